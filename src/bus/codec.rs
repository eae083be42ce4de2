//! Protobuf codec for bus records.
//!
//! Encoding validates required fields first; decoding validates after parsing,
//! so a payload that parses but lacks identity fields is still a decode error.

use bytes::Bytes;
use prost::Message;

use super::schema::{DecodedRecord, SchemaId};
use super::{BusError, Result};
use crate::proto::{AccountPayload, UserPayload};

/// A protobuf record with a known schema.
pub trait Record: Message + Default + Sized {
    const SCHEMA: SchemaId;

    /// Check required fields.
    fn validate(&self) -> std::result::Result<(), String>;
}

impl Record for AccountPayload {
    const SCHEMA: SchemaId = SchemaId::Account;

    fn validate(&self) -> std::result::Result<(), String> {
        if self.account_number.is_empty() {
            return Err("account_number is required".to_string());
        }
        if self.user_id.is_empty() {
            return Err("user_id is required".to_string());
        }
        Ok(())
    }
}

impl Record for UserPayload {
    const SCHEMA: SchemaId = SchemaId::User;

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("id is required".to_string());
        }
        Ok(())
    }
}

/// Serialize a record to its wire bytes.
pub fn encode<R: Record>(record: &R) -> Result<Bytes> {
    record
        .validate()
        .map_err(|e| BusError::Encoding(format!("{}: {}", R::SCHEMA, e)))?;
    Ok(Bytes::from(record.encode_to_vec()))
}

/// Parse wire bytes as a specific record type.
pub fn decode_as<R: Record>(bytes: &[u8]) -> Result<R> {
    let record = R::decode(bytes).map_err(|e| BusError::Decoding {
        schema: R::SCHEMA.to_string(),
        message: e.to_string(),
    })?;
    record.validate().map_err(|message| BusError::Decoding {
        schema: R::SCHEMA.to_string(),
        message,
    })?;
    Ok(record)
}

/// Parse wire bytes using a schema resolved at runtime.
pub fn decode(bytes: &[u8], schema: SchemaId) -> Result<DecodedRecord> {
    match schema {
        SchemaId::Account => decode_as::<AccountPayload>(bytes).map(DecodedRecord::Account),
        SchemaId::User => decode_as::<UserPayload>(bytes).map(DecodedRecord::User),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::Timestamp;

    fn sample_user() -> UserPayload {
        UserPayload {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            phone_number: "+15550100".to_string(),
            avatar_url: String::new(),
            is_deleted: false,
        }
    }

    fn sample_account() -> AccountPayload {
        AccountPayload {
            name: "Savings".to_string(),
            balance: 125.5,
            account_number: "ACC0000000001".to_string(),
            user_id: "u1".to_string(),
            updated_at: Some(Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
            is_deleted: false,
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let user = sample_user();
        assert_eq!(encode(&user).unwrap(), encode(&user.clone()).unwrap());
    }

    #[test]
    fn test_decode_restores_account_fields() {
        let account = sample_account();
        let bytes = encode(&account).unwrap();
        let decoded: AccountPayload = decode_as(&bytes).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_decode_by_schema_tags_record() {
        let bytes = encode(&sample_user()).unwrap();
        let record = decode(&bytes, SchemaId::User).unwrap();
        assert_eq!(record.schema(), SchemaId::User);
    }

    #[test]
    fn test_encode_rejects_missing_required_field() {
        let err = encode(&UserPayload::default()).unwrap_err();
        assert!(matches!(err, BusError::Encoding(ref m) if m.contains("id is required")));

        let account = AccountPayload {
            user_id: String::new(),
            ..sample_account()
        };
        assert!(matches!(encode(&account), Err(BusError::Encoding(_))));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let bytes = encode(&sample_user()).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        let err = decode_as::<UserPayload>(truncated).unwrap_err();
        assert!(matches!(err, BusError::Decoding { ref schema, .. } if schema == "UserPayload"));
    }

    #[test]
    fn test_decode_garbage_payload() {
        let err = decode(&[0xff, 0xff, 0xff], SchemaId::Account).unwrap_err();
        assert!(matches!(err, BusError::Decoding { .. }));
    }

    #[test]
    fn test_decode_empty_payload_fails_validation() {
        // An empty buffer parses as a default record, which has no id.
        let err = decode(&[], SchemaId::User).unwrap_err();
        assert!(matches!(err, BusError::Decoding { ref message, .. } if message.contains("id")));
    }
}
