//! Encoding of call results for the disk store

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use toolgate_foundation::{Encoding, StoredEntry};

/// Result of encoding a value, tagged with the tier that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// serde_json bytes; decodes back exactly
    Serialized(Vec<u8>),
    /// `Debug` text, kept when serde could not represent the value
    FallbackText(String),
    /// Nothing worth persisting
    Failed(String),
}

impl EncodedValue {
    /// Try each tier in order: serde, then `Debug` text
    pub fn encode<T: Serialize + Debug + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => EncodedValue::Serialized(bytes),
            Err(e) => {
                let text = format!("{:?}", value);
                if text.is_empty() {
                    EncodedValue::Failed(format!("not serializable ({}) and no text form", e))
                } else {
                    EncodedValue::FallbackText(text)
                }
            }
        }
    }

    pub fn tier(&self) -> &'static str {
        match self {
            EncodedValue::Serialized(_) => "serialized",
            EncodedValue::FallbackText(_) => "fallback_text",
            EncodedValue::Failed(_) => "failed",
        }
    }

    /// Entry to persist, `None` for [`EncodedValue::Failed`]
    pub fn into_entry(self) -> Option<StoredEntry> {
        match self {
            EncodedValue::Serialized(bytes) => Some(StoredEntry::new(Encoding::Json, bytes)),
            EncodedValue::FallbackText(text) => serde_json::to_vec(&text)
                .ok()
                .map(|bytes| StoredEntry::new(Encoding::Text, bytes)),
            EncodedValue::Failed(_) => None,
        }
    }
}

/// Decode a stored entry as `T`.
///
/// Text entries are JSON strings, so they only decode into string-like
/// types; anything that does not decode is `None`.
pub fn decode_entry<T: DeserializeOwned>(entry: &StoredEntry) -> Option<T> {
    serde_json::from_slice(&entry.value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::{Error as _, Serializer};
    use serde_json::Value;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct Handle {
        id: u32,
    }

    impl Serialize for Handle {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("handles cannot be serialized"))
        }
    }

    #[test]
    fn test_serialized_tier() {
        let value = vec![("a".to_string(), 1)];
        let encoded = EncodedValue::encode(&value);
        assert_eq!(encoded.tier(), "serialized");

        let entry = encoded.into_entry().unwrap();
        assert_eq!(entry.encoding, Encoding::Json);
        assert_eq!(decode_entry::<Vec<(String, i32)>>(&entry), Some(value));
    }

    #[test]
    fn test_fallback_text_tier() {
        let encoded = EncodedValue::encode(&Handle { id: 4 });
        assert_eq!(encoded, EncodedValue::FallbackText("Handle { id: 4 }".into()));

        let entry = encoded.into_entry().unwrap();
        assert_eq!(entry.encoding, Encoding::Text);
        assert_eq!(decode_entry::<String>(&entry).as_deref(), Some("Handle { id: 4 }"));
        assert_eq!(
            decode_entry::<Value>(&entry),
            Some(Value::String("Handle { id: 4 }".into()))
        );
        assert!(decode_entry::<HashMap<String, u32>>(&entry).is_none());
    }

    #[test]
    fn test_failed_tier_has_no_entry() {
        let failed = EncodedValue::Failed("nothing".into());
        assert_eq!(failed.tier(), "failed");
        assert!(failed.into_entry().is_none());
    }
}
