//! JSON codec for stored and transmitted records

use crate::error::{RegistryError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serializer handed to every component that reads or writes records.
///
/// Built once at startup and cloned into the writer and the watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit indented JSON (handy when inspecting a store by hand)
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.map_err(|e| RegistryError::InvalidArgument(format!("unencodable record: {}", e)))
    }

    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MetadataRecord, RpcType};

    #[test]
    fn test_decode_garbage() {
        let codec = JsonCodec::new();
        let result: Result<MetadataRecord> = codec.decode("not json");
        assert!(matches!(result, Err(RegistryError::DeserializationFailed(_))));

        let result: Result<MetadataRecord> = codec.decode("");
        assert!(result.is_err());
    }

    #[test]
    fn test_pretty_output_decodes() {
        let codec = JsonCodec::pretty();
        let record = MetadataRecord::route(RpcType::Http, "/order", "/list");
        let encoded = codec.encode(&record).unwrap();
        assert!(encoded.contains('\n'));

        let decoded: MetadataRecord = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }
}
