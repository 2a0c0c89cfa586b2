//! Durable record store + HTTP fetch utilities shared by every pipeline stage.

mod http;
mod jsonl;

pub use http::{
    is_retryable_status, quota_pause, retry_after, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher,
};
pub use jsonl::{rewrite_atomically, JsonlStore, RecordIter};

use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "vsboard-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
