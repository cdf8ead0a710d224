//! Delivery verification helper for subscribers.

use crate::objects::DeliveryPayload;
use crate::signature::{SignatureError, SignedPayload, check_timestamp};

/// Verify and deserialize an incoming broker delivery.
///
/// * `signature_header` – value of the `X-Webhook-Signature` request header.
/// * `body` – raw JSON request body string.
/// * `secret` – the subscription secret shared with the broker.
///
/// Returns the authenticated payload when the HMAC matches and the payload
/// timestamp is fresh.
///
/// # Example
///
/// ```ignore
/// use crmsync_sdk::webhook::verify_delivery;
///
/// let payload = verify_delivery(signature_header, &body, subscription_secret)?;
/// println!("{} {}", payload.event.event_type, payload.event.object_id);
/// ```
pub fn verify_delivery(
    signature_header: &str,
    body: &str,
    secret: &[u8],
) -> Result<DeliveryPayload, SignatureError> {
    let payload =
        SignedPayload::<DeliveryPayload>::from_header_and_body(signature_header, body.to_owned())?
            .verify(secret)?;
    check_timestamp(payload.timestamp)?;
    Ok(payload)
}
