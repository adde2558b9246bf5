use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

/// Deterministic identity of a single (campaign, recipient) send.
///
/// Doubles as the Work-Record primary key, the per-recipient queue
/// idempotency key, and the dedupe key a worker uses internally. Two calls
/// with the same campaign id and a normalized-equal email always return the
/// same value, on any node, after any restart — it is a pure function of its
/// inputs, never a random id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// `campaignId + ":" + normalizedEmail`, SHA-256'd, truncated to 16 bytes.
    /// Truncation is fine here: this is a collision-resistant identifier, not
    /// a MAC, and 128 bits is far beyond the birthday bound for any campaign
    /// this system will ever run.
    pub fn new(
        campaign_id: Uuid,
        normalized_email: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(campaign_id.as_bytes());
        hasher.update(b":");
        hasher.update(normalized_email.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    pub fn as_hex(&self) -> String { hex::encode(self.0) }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self { value.as_hex() }
}

/// `batch_{campaignId}_{chunkIndex}` — deterministic, so redriving
/// materialization re-enqueues the same batch id and the queue's own
/// dedup-on-job-id takes care of the rest.
pub fn batch_id(
    campaign_id: Uuid,
    chunk_index: u32,
) -> String {
    format!("batch_{campaign_id}_{chunk_index}")
}

/// `email_{24-hex-hash}` — the per-message id the wire contract requires,
/// built from a recipient's fingerprint hex and passed to the provider as
/// its idempotency key (see `OutboundMessage::message_id`).
pub fn provider_message_id(fingerprint_hex: &str) -> String {
    format!("email_{}", &fingerprint_hex[..24.min(fingerprint_hex.len())])
}
