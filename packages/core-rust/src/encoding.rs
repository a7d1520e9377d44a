//! Serde adapters for JSON member encodings that differ from serde's defaults.
//!
//! Blobs travel as standard base64 strings; timestamps travel as fractional
//! seconds since the Unix epoch.

/// `Option<Vec<u8>>` as an optional base64 string.
pub mod optional_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Fails if the member is not a valid base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// `Option<SystemTime>` as optional fractional epoch seconds.
pub mod optional_epoch_seconds {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_f64(to_epoch_seconds(*time)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Fails if the member is not a finite number or is out of range.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SystemTime>, D::Error> {
        let seconds: Option<f64> = Option::deserialize(deserializer)?;
        seconds
            .map(|s| from_epoch_seconds(s).ok_or_else(|| serde::de::Error::custom("timestamp out of range")))
            .transpose()
    }

    fn to_epoch_seconds(time: SystemTime) -> f64 {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        }
    }

    fn from_epoch_seconds(seconds: f64) -> Option<SystemTime> {
        let magnitude = Duration::try_from_secs_f64(seconds.abs()).ok()?;
        if seconds.is_sign_negative() {
            UNIX_EPOCH.checked_sub(magnitude)
        } else {
            UNIX_EPOCH.checked_add(magnitude)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        #[serde(with = "super::optional_blob", skip_serializing_if = "Option::is_none", default)]
        blob: Option<Vec<u8>>,
        #[serde(
            with = "super::optional_epoch_seconds",
            skip_serializing_if = "Option::is_none",
            default
        )]
        at: Option<SystemTime>,
    }

    #[test]
    fn blob_encodes_as_base64() {
        let record = Record {
            blob: Some(b"hello".to_vec()),
            at: None,
        };
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"blob": "aGVsbG8="}));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = serde_json::from_value::<Record>(json!({"blob": "***"}));
        assert!(err.is_err());
    }

    #[test]
    fn timestamp_encodes_as_fractional_seconds() {
        let record = Record {
            blob: None,
            at: Some(UNIX_EPOCH + Duration::from_millis(1_500)),
        };
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"at": 1.5}));

        let decoded: Record = serde_json::from_value(json!({"at": 1.5})).unwrap();
        assert_eq!(decoded.at, Some(UNIX_EPOCH + Duration::from_millis(1_500)));
    }

    #[test]
    fn timestamp_before_epoch() {
        let decoded: Record = serde_json::from_value(json!({"at": -2.0})).unwrap();
        assert_eq!(decoded.at, Some(UNIX_EPOCH - Duration::from_secs(2)));
    }

    #[test]
    fn missing_members_decode_as_none() {
        let decoded: Record = serde_json::from_value(json!({})).unwrap();
        assert_eq!(decoded, Record { blob: None, at: None });
    }
}

#[cfg(test)]
mod proptests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        #[serde(with = "super::optional_blob", default)]
        blob: Option<Vec<u8>>,
        #[serde(with = "super::optional_epoch_seconds", default)]
        at: Option<SystemTime>,
    }

    proptest! {
        #[test]
        fn blob_survives_json(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let record = Record { blob: Some(bytes), at: None };
            let json = serde_json::to_string(&record).unwrap();
            let decoded: Record = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn millisecond_timestamps_survive_json(millis in 0u64..4_102_444_800_000) {
            let at = UNIX_EPOCH + Duration::from_millis(millis);
            let json = serde_json::to_string(&Record { blob: None, at: Some(at) }).unwrap();
            let decoded: Record = serde_json::from_str(&json).unwrap();
            let decoded_at = decoded.at.unwrap();
            let drift = decoded_at
                .duration_since(at)
                .unwrap_or_else(|e| e.duration());
            prop_assert!(drift < Duration::from_millis(1));
        }
    }
}
