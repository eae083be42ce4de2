//! Topic to schema mapping.
//!
//! Consumers resolve the record type for an envelope from its topic before
//! decoding, so a decoded payload is always a tagged `DecodedRecord`.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use super::codec;
use super::envelope::Envelope;
use super::topics::{Domain, Topic};
use super::{BusError, Result};
use crate::proto::{AccountPayload, UserPayload};

/// Record schemas carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaId {
    Account,
    User,
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaId::Account => f.write_str("AccountPayload"),
            SchemaId::User => f.write_str("UserPayload"),
        }
    }
}

/// A payload decoded according to its topic's schema.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    Account(AccountPayload),
    User(UserPayload),
}

impl DecodedRecord {
    pub fn schema(&self) -> SchemaId {
        match self {
            DecodedRecord::Account(_) => SchemaId::Account,
            DecodedRecord::User(_) => SchemaId::User,
        }
    }
}

/// Maps topic names to the schema of the records they carry.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaId>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every platform topic.
    ///
    /// Notification topics carry the record of the entity they announce.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for topic in Topic::ALL {
            let schema = match topic.domain {
                Domain::Account => SchemaId::Account,
                Domain::User => SchemaId::User,
                Domain::Notification if topic == Topic::NOTIFICATION_ACCOUNT_CREATED => {
                    SchemaId::Account
                }
                Domain::Notification => SchemaId::User,
            };
            registry.register(topic.name, schema);
        }
        registry
    }

    /// Add or replace the schema for a topic.
    pub fn register(&mut self, topic: impl Into<String>, schema: SchemaId) {
        self.schemas.insert(topic.into(), schema);
    }

    pub fn schema_for(&self, topic: &str) -> Option<SchemaId> {
        self.schemas.get(topic).copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Decode an envelope's payload with the schema registered for its topic.
    pub fn decode_envelope(&self, envelope: &Envelope) -> Result<DecodedRecord> {
        let schema = self
            .schema_for(&envelope.topic)
            .ok_or_else(|| BusError::Decoding {
                schema: "unknown".to_string(),
                message: format!("no schema registered for topic '{}'", envelope.topic),
            })?;
        codec::decode(&envelope.payload, schema)
    }
}
