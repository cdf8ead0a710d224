//! Delivery signatures.
//!
//! Every outbound delivery from the broker carries an HMAC-SHA256 signature
//! of the exact JSON body it sends. The wire format for the header is:
//!
//! ```text
//! X-Webhook-Signature: v1={hex_signature}
//! ```
//!
//! The signed data is the serialized body itself. Freshness is checked
//! against the `timestamp` field carried inside the payload
//! (see [`check_timestamp`]).

/// Header name for the delivery signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Version prefix of the signature scheme.
pub const SIGNATURE_VERSION: &str = "v1";

/// Maximum allowed distance between a payload timestamp and the local clock,
/// in either direction (in milliseconds).
pub const MAX_SIGNATURE_AGE_MS: u64 = 5 * 60 * 1000;

/// Marker trait for types that can be carried in a [`SignedPayload`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("unsupported signature version")]
    UnsupportedVersion,
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
    #[error("signature timestamp is in the future")]
    FromFuture,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// SignedPayload: body signing
// ---------------------------------------------------------------------------

/// A signed delivery body carrying its typed payload, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload<T: Signature> {
    pub body: T,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedPayload<T> {
    /// Serialize `body` to JSON and sign it with `key`.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let signature = sign_bytes(json.as_bytes(), key);
        Ok(Self {
            body,
            json,
            signature,
        })
    }

    /// Reconstruct a [`SignedPayload`] from a raw signature header value and
    /// the JSON request body.
    ///
    /// This parses the header and deserializes the body but does **not**
    /// verify the HMAC; call [`verify`](Self::verify) for that.
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let signature = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC signature, consuming `self` and returning the
    /// authenticated payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        verify_bytes(self.json.as_bytes(), &self.signature, key)?;
        Ok(self.body)
    }

    /// Format the full header value (`v1={hex}`).
    pub fn to_header(&self) -> String {
        format_signature_header(&self.signature)
    }
}

// ---------------------------------------------------------------------------
// Raw signing
// ---------------------------------------------------------------------------

/// Compute `HMAC-SHA256(data, key)`.
pub fn sign_bytes(data: &[u8], key: &[u8]) -> Box<[u8]> {
    let tag = ring::hmac::sign(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key), data);
    tag.as_ref().to_owned().into_boxed_slice()
}

/// Verify `HMAC-SHA256(data, key)` in constant time.
pub fn verify_bytes(data: &[u8], signature: &[u8], key: &[u8]) -> Result<(), SignatureError> {
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data,
        signature,
    )?;
    Ok(())
}

/// Sign a raw body and return the formatted header value.
pub fn sign_body(body: &[u8], key: &[u8]) -> String {
    format_signature_header(&sign_bytes(body, key))
}

/// Verify a raw body against a header value.
pub fn verify_body(header_value: &str, body: &[u8], key: &[u8]) -> Result<(), SignatureError> {
    let signature = parse_signature_header(header_value)?;
    verify_bytes(body, &signature, key)
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Parse a `v1={hex}` header value into the raw signature bytes.
pub fn parse_signature_header(value: &str) -> Result<Box<[u8]>, SignatureError> {
    let (version, hex_sig) = value
        .trim()
        .split_once('=')
        .ok_or(SignatureError::InvalidFormat)?;
    if version != SIGNATURE_VERSION {
        return Err(SignatureError::UnsupportedVersion);
    }
    let bytes = hex::decode(hex_sig).map_err(|_| SignatureError::InvalidHex)?;
    Ok(bytes.into_boxed_slice())
}

/// Format a `v1={hex}` header value from raw signature bytes.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}={}", SIGNATURE_VERSION, hex::encode(signature))
}

// ---------------------------------------------------------------------------
// Timestamp validation
// ---------------------------------------------------------------------------

/// Check that a payload timestamp (unix millis) is within
/// [`MAX_SIGNATURE_AGE_MS`] of the local clock.
pub fn check_timestamp(timestamp_ms: i64) -> Result<(), SignatureError> {
    let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    check_timestamp_at(timestamp_ms, now)
}

/// [`check_timestamp`] against an explicit `now_ms`.
pub fn check_timestamp_at(timestamp_ms: i64, now_ms: i64) -> Result<(), SignatureError> {
    if now_ms.abs_diff(timestamp_ms) <= MAX_SIGNATURE_AGE_MS {
        Ok(())
    } else if timestamp_ms > now_ms {
        Err(SignatureError::FromFuture)
    } else {
        Err(SignatureError::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Ping {
        value: u32,
    }

    impl Signature for Ping {}

    #[test]
    fn header_has_version_prefix_and_hex() {
        let header = sign_body(b"{}", b"secret");
        let (version, sig) = header.split_once('=').unwrap();
        assert_eq!(version, "v1");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signed_payload_verifies_with_same_key() {
        let signed = SignedPayload::new(Ping { value: 7 }, b"k1").unwrap();
        let header = signed.to_header();
        let parsed = SignedPayload::<Ping>::from_header_and_body(&header, signed.json).unwrap();
        assert_eq!(parsed.verify(b"k1").unwrap(), Ping { value: 7 });
    }

    #[test]
    fn wrong_key_is_rejected() {
        let header = sign_body(br#"{"value":1}"#, b"right");
        let err = verify_body(&header, br#"{"value":1}"#, b"wrong").unwrap_err();
        assert!(matches!(err, SignatureError::SignatureMismatch));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign_body(br#"{"value":1}"#, b"k");
        assert!(verify_body(&header, br#"{"value":2}"#, b"k").is_err());
    }

    #[test]
    fn malformed_headers() {
        assert!(matches!(
            parse_signature_header("deadbeef"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("v2=00"),
            Err(SignatureError::UnsupportedVersion)
        ));
        assert!(matches!(
            parse_signature_header("v1=zz"),
            Err(SignatureError::InvalidHex)
        ));
    }

    #[test]
    fn stale_timestamp_expires() {
        let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        assert!(check_timestamp(now).is_ok());
        assert!(matches!(
            check_timestamp(now - MAX_SIGNATURE_AGE_MS as i64 - 1_000),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn timestamp_window_applies_both_ways() {
        let now = 1_700_000_000_000;
        let max = MAX_SIGNATURE_AGE_MS as i64;
        assert!(check_timestamp_at(now + max, now).is_ok());
        assert!(check_timestamp_at(now - max, now).is_ok());
        assert!(matches!(
            check_timestamp_at(now + max + 1, now),
            Err(SignatureError::FromFuture)
        ));
        assert!(matches!(
            check_timestamp_at(i64::MAX, now),
            Err(SignatureError::FromFuture)
        ));
        assert!(matches!(
            check_timestamp_at(i64::MIN, now),
            Err(SignatureError::Expired)
        ));
    }
}
