//! Canonical blob encoding for stored entities.
//!
//! The persistent store only ever sees the encoded form; structured fields
//! are derived by decoding it. Unknown fields observed on decode are carried
//! in the entity's `extra` map and survive the next encode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::model::{Record, ResultEntry};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {entity}: {source}")]
    Encode {
        entity: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to decode stored {entity}: {source}")]
    Decode {
        entity: &'static str,
        source: serde_json::Error,
    },
}

pub fn encode_result(entry: &ResultEntry) -> Result<Vec<u8>, CodecError> {
    encode(entry, "result")
}

pub fn decode_result(blob: &[u8]) -> Result<ResultEntry, CodecError> {
    decode(blob, "result")
}

pub fn encode_record(record: &Record) -> Result<Vec<u8>, CodecError> {
    encode(record, "record")
}

pub fn decode_record(blob: &[u8]) -> Result<Record, CodecError> {
    decode(blob, "record")
}

fn encode<T: Serialize>(value: &T, entity: &'static str) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|source| CodecError::Encode { entity, source })
}

fn decode<T: DeserializeOwned>(blob: &[u8], entity: &'static str) -> Result<T, CodecError> {
    serde_json::from_slice(blob).map_err(|source| CodecError::Decode { entity, source })
}

/// Serde adapter storing byte payloads as url-safe base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
