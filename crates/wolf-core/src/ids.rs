use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const REPORT_ID_PREFIX: &str = "rpt";
const REPORT_ID_DIGEST_CHARS: usize = 24;

/// Derives the stable report identifier for `source_filename` ingested at `ingested_at`.
///
/// The same pair always yields the same id, so a retried write after a crash
/// lands on the row created by the first attempt.
pub fn derive_report_id(source_filename: &str, ingested_at: DateTime<Utc>) -> String {
    let material = format!(
        "{source_filename}\u{1f}{}",
        ingested_at.timestamp_nanos_opt().unwrap_or_else(|| ingested_at.timestamp_micros())
    );
    format!(
        "{REPORT_ID_PREFIX}-{}",
        short_digest(material.as_bytes(), REPORT_ID_DIGEST_CHARS)
    )
}

/// Returns the first `chars` lowercase hex characters of the SHA-256 of `input`.
pub fn short_digest(input: &[u8], chars: usize) -> String {
    let digest = Sha256::digest(input);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(chars.min(hex.len()));
    hex
}
