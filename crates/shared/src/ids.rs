//! Batch and job id generation.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Generates a batch id of the form `"<kind>_<epoch_ms>_<random>"`.
///
/// `kind` is typically `"hist"` or `"latest"`. The random suffix is six
/// lowercase alphanumeric characters, enough to disambiguate batches
/// produced within the same millisecond.
pub fn generate_batch_id(kind: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}_{}", kind, now.timestamp_millis(), random_suffix(6))
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}
