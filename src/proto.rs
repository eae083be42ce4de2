//! Protobuf records carried on the message bus.
//!
//! These mirror the `qwallet.v1` schema. They are declared with the prost
//! derive directly so the crate builds without `protoc`.

use prost_types::Timestamp;

/// Account state published on `qwallet.account.*` topics.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountPayload {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(float, tag = "2")]
    pub balance: f32,
    #[prost(string, tag = "3")]
    pub account_number: String,
    #[prost(string, tag = "4")]
    pub user_id: String,
    #[prost(message, optional, tag = "5")]
    pub updated_at: Option<Timestamp>,
    #[prost(bool, tag = "6")]
    pub is_deleted: bool,
}

/// User profile published on `qwallet.user.*` topics.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserPayload {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub email: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub phone_number: String,
    #[prost(string, tag = "5")]
    pub avatar_url: String,
    #[prost(bool, tag = "6")]
    pub is_deleted: bool,
}
