use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::de::DeserializeOwned;

use crate::errors::IapError;

/// Decodes the payload from a compact-serialized JWS (`header.payload.sig`),
/// without performing any signature verification.
///
/// Callers must not grant anything based on the decoded contents alone.
pub(crate) fn decode_jws_payload<T: DeserializeOwned>(data: &str) -> Result<T, IapError> {
    let mut segments = data.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(IapError::InvalidJws(
            "expected three dot-separated segments".into(),
        ));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| IapError::InvalidJws(format!("failed to base64-decode payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IapError::InvalidJws(format!("failed to parse JWS payload: {e}")))
}

/// Whether a string looks like a compact JWS rather than a bare identifier.
pub(crate) fn looks_like_jws(data: &str) -> bool {
    data.contains('.')
}

#[cfg(test)]
pub(crate) fn encode_test_jws(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","x5c":[]}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Payload {
        sub: String,
    }

    #[test]
    fn decodes_compact_payload() {
        let jws = encode_test_jws(&serde_json::json!({"sub": "abc"}));
        let payload: Payload = decode_jws_payload(&jws).unwrap();
        assert_eq!(payload.sub, "abc");
        assert!(looks_like_jws(&jws));
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!(
            decode_jws_payload::<Payload>("a.b"),
            Err(IapError::InvalidJws(_))
        ));
        assert!(decode_jws_payload::<Payload>("a.b.c.d").is_err());
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(decode_jws_payload::<Payload>("aGVhZGVy.!!!.c2ln").is_err());
        let not_json = format!("aGVhZGVy.{}.c2ln", URL_SAFE_NO_PAD.encode("nope"));
        assert!(decode_jws_payload::<Payload>(&not_json).is_err());
    }
}
