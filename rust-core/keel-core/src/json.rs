//! JSON input: request bodies bound as action arguments and configuration
//! files. Parsing goes through simd-json; output is left to `serde_json`.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize `text` into `T`
///
/// # Errors
///
/// Returns `Error::JsonParse` with the parser's message.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let mut scratch = text.as_bytes().to_vec();
    from_scratch(&mut scratch)
}

/// Parse a request body into a JSON value; an empty body is `null`
///
/// simd-json parses in place, so the body is copied first.
///
/// # Errors
///
/// Returns `Error::JsonParse` with the parser's message.
pub fn parse_body(body: &[u8]) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    let mut scratch = body.to_vec();
    from_scratch(&mut scratch)
}

fn from_scratch<T: DeserializeOwned>(scratch: &mut [u8]) -> Result<T> {
    simd_json::from_slice(scratch).map_err(|e| Error::JsonParse {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        max_body: usize,
        hosts: Vec<String>,
    }

    #[test]
    fn test_parse_json_typed() {
        let limits: Limits = parse_json(r#"{"max_body": 512, "hosts": ["a", "b"]}"#).unwrap();
        assert_eq!(limits, Limits { max_body: 512, hosts: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_parse_body_values() {
        assert_eq!(parse_body(b"").unwrap(), Value::Null);
        let value = parse_body(br#"{"user": {"name": "ada"}, "tags": [1, 2]}"#).unwrap();
        assert_eq!(value["user"]["name"], "ada");
        assert_eq!(value["tags"][1], 2);
    }

    #[test]
    fn test_parse_errors_are_json_parse() {
        assert!(matches!(parse_body(b"{oops"), Err(Error::JsonParse { .. })));
        assert!(matches!(parse_json::<Limits>("[]"), Err(Error::JsonParse { .. })));
    }
}
