//! Shapes of the echo test service.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::model::Shape;

/// A product with an optional name and price.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<f32>,
}

impl Shape for Product {
    const SHAPE_NAME: &'static str = "awstest#Product";
}

/// A key/value pair; both members are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub key: String,
    pub value: String,
}

impl Shape for Pair {
    const SHAPE_NAME: &'static str = "awstest#Pair";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FruitEnum {
    #[serde(rename = "apl")]
    Apple,
    #[serde(rename = "org")]
    Orange,
    #[serde(rename = "ban")]
    Banana,
    #[serde(rename = "pin")]
    Pineapple,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
}

impl Shape for Customer {
    const SHAPE_NAME: &'static str = "awstest#Customer";
}

/// Message covering every member type the echo service round-trips.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub string_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub boolean_message: Option<bool>,
    #[serde(
        with = "encoding::optional_epoch_seconds",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub time_message: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub document_message: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enum_message: Option<FruitEnum>,
    #[serde(
        with = "encoding::optional_blob",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub blob_message: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub string_list_message: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_value_pair_list: Option<Vec<Pair>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub string_to_value: Option<BTreeMap<String, Product>>,
}

impl Shape for MessageData {
    const SHAPE_NAME: &'static str = "awstest#MessageData";
}

/// Union message exchanged on echo streams; exactly one member is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EchoStreamingMessage {
    StreamMessage(MessageData),
    KeyValuePair(Pair),
}

impl Shape for EchoStreamingMessage {
    const SHAPE_NAME: &'static str = "awstest#EchoStreamingMessage";
}

/// Modeled service error raised by the `Cause*` operations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
}

impl Shape for ServiceError {
    const SHAPE_NAME: &'static str = "awstest#ServiceError";
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or("service error"))?;
        if let Some(value) = &self.value {
            write!(f, " ({value})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetAllProductsRequest {}

impl Shape for GetAllProductsRequest {
    const SHAPE_NAME: &'static str = "awstest#GetAllProductsRequest";
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetAllProductsResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub products: Option<BTreeMap<String, Product>>,
}

impl Shape for GetAllProductsResponse {
    const SHAPE_NAME: &'static str = "awstest#GetAllProductsResponse";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetAllCustomersRequest {}

impl Shape for GetAllCustomersRequest {
    const SHAPE_NAME: &'static str = "awstest#GetAllCustomersRequest";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetAllCustomersResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub customers: Option<Vec<Customer>>,
}

impl Shape for GetAllCustomersResponse {
    const SHAPE_NAME: &'static str = "awstest#GetAllCustomersResponse";
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EchoMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<MessageData>,
}

impl Shape for EchoMessageRequest {
    const SHAPE_NAME: &'static str = "awstest#EchoMessageRequest";
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EchoMessageResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<MessageData>,
}

impl Shape for EchoMessageResponse {
    const SHAPE_NAME: &'static str = "awstest#EchoMessageResponse";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EchoStreamingRequest {}

impl Shape for EchoStreamingRequest {
    const SHAPE_NAME: &'static str = "awstest#EchoStreamingRequest";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EchoStreamingResponse {}

impl Shape for EchoStreamingResponse {
    const SHAPE_NAME: &'static str = "awstest#EchoStreamingResponse";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CauseServiceErrorRequest {}

impl Shape for CauseServiceErrorRequest {
    const SHAPE_NAME: &'static str = "awstest#CauseServiceErrorRequest";
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CauseServiceErrorResponse {}

impl Shape for CauseServiceErrorResponse {
    const SHAPE_NAME: &'static str = "awstest#CauseServiceErrorResponse";
}
