//! Unsubscribe link minting: binds a signed token to (campaignId,
//! customerId, email) so the (external) unsubscribe landing page can verify
//! a request without a database round trip. Verifying the token and serving
//! the landing page itself are out of scope for this service — this module
//! only mints the link embedded in outbound messages.

use hmac::Hmac;
use hmac::Mac;
use secrecy::ExposeSecret;
use secrecy::Secret;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Signs `campaignId:customerId:email` (customer id empty when absent).
/// Hex-encoded, so it needs no further escaping to sit in a query string.
pub fn mint_token(
    secret: &Secret<String>,
    campaign_id: Uuid,
    customer_id: Option<Uuid>,
    normalized_email: &str,
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).expect("hmac key accepts any length");
    mac.update(campaign_id.as_bytes());
    mac.update(b":");
    mac.update(customer_id.map(|id| id.to_string()).unwrap_or_default().as_bytes());
    mac.update(b":");
    mac.update(normalized_email.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Full unsubscribe URL embedded in a personalized message. The landing
/// page this points to, and the verification of `token`, live outside this
/// service.
pub fn unsubscribe_url(
    base_url: &str,
    secret: &Secret<String>,
    campaign_id: Uuid,
    customer_id: Option<Uuid>,
    normalized_email: &str,
) -> String {
    let token = mint_token(secret, campaign_id, customer_id, normalized_email);
    format!("{base_url}/unsubscribe?campaign={campaign_id}&email={}&token={token}", urlencoding::encode(normalized_email))
}
