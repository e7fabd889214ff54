//! Pre-write inspection and content checksums.
//!
//! Serialized documents are scanned before they touch disk so that a broken
//! serializer or a hand-assembled payload can never land under a final path.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::IntegrityError;

/// Hex-encoded SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Rejects obviously corrupted serialized forms.
///
/// Delimiter counting skips string literals, so braces inside messages do not
/// trip the scan.
pub fn inspect_serialized(text: &str) -> Result<(), IntegrityError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IntegrityError::Empty);
    }

    let mut braces: i64 = 0;
    let mut brackets: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut closed_roots = 0_usize;

    for ch in trimmed.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => {
                if braces == 0 && brackets == 0 && closed_roots > 0 {
                    return Err(IntegrityError::ConcatenatedDocuments);
                }
                if ch == '{' {
                    braces += 1;
                } else {
                    brackets += 1;
                }
            }
            '}' | ']' => {
                if ch == '}' {
                    braces -= 1;
                } else {
                    brackets -= 1;
                }
                if braces < 0 || brackets < 0 {
                    return Err(IntegrityError::Unbalanced { delimiter: ch });
                }
                if braces == 0 && brackets == 0 {
                    closed_roots += 1;
                }
            }
            _ => {}
        }
    }

    if in_string {
        return Err(IntegrityError::UnterminatedString);
    }
    if braces != 0 {
        return Err(IntegrityError::Unbalanced { delimiter: '{' });
    }
    if brackets != 0 {
        return Err(IntegrityError::Unbalanced { delimiter: '[' });
    }

    let keys: TopLevelKeys =
        serde_json::from_str(trimmed).map_err(|error| IntegrityError::Malformed(error.to_string()))?;
    if let Some(section) = keys.duplicate {
        return Err(IntegrityError::DuplicateSection(section));
    }

    Ok(())
}

/// Top-level key scan. `serde_json::Value` silently keeps the last duplicate,
/// so the keys are walked by hand.
struct TopLevelKeys {
    duplicate: Option<String>,
}

impl<'de> Deserialize<'de> for TopLevelKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TopLevelKeysVisitor)
    }
}

struct TopLevelKeysVisitor;

impl<'de> Visitor<'de> for TopLevelKeysVisitor {
    type Value = TopLevelKeys;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a JSON document")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut seen = HashSet::new();
        let mut duplicate = None;
        while let Some(key) = map.next_key::<String>()? {
            map.next_value::<IgnoredAny>()?;
            if !seen.insert(key.clone()) && duplicate.is_none() {
                duplicate = Some(key);
            }
        }
        Ok(TopLevelKeys { duplicate })
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(TopLevelKeys { duplicate: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_document_with_braces_in_strings() {
        let text = r#"{"metadata": {"error_message": "bad }{ payload"}, "basic_data": [1, 2]}"#;
        inspect_serialized(text).expect("document should pass");
    }

    #[test]
    fn rejects_concatenated_documents() {
        let err = inspect_serialized(r#"{"a": 1}{"b": 2}"#).expect_err("must fail");
        assert_eq!(err, IntegrityError::ConcatenatedDocuments);
    }

    #[test]
    fn rejects_leading_close_brace() {
        let err = inspect_serialized(r#"}{"a": 1}"#).expect_err("must fail");
        assert_eq!(err, IntegrityError::Unbalanced { delimiter: '}' });
    }

    #[test]
    fn rejects_unclosed_object() {
        let err = inspect_serialized(r#"{"a": {"b": 1}"#).expect_err("must fail");
        assert_eq!(err, IntegrityError::Unbalanced { delimiter: '{' });
    }

    #[test]
    fn rejects_duplicate_metadata_section() {
        let text = r#"{"metadata": {"a": 1}, "basic_data": {}, "metadata": {"a": 2}}"#;
        let err = inspect_serialized(text).expect_err("must fail");
        assert_eq!(err, IntegrityError::DuplicateSection(String::from("metadata")));
    }

    #[test]
    fn nested_duplicate_names_are_not_top_level_sections() {
        let text = r#"{"metadata": {"source": "a"}, "basic_data": {"source": "b"}}"#;
        inspect_serialized(text).expect("nested keys may repeat across sections");
    }

    #[test]
    fn checksum_is_stable_hex_sha256() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
