//! Deterministic cache keys built from request inputs
//!
//! Free-text parts are length-prefixed (`<len>:<text>`) so a separator
//! inside one input can never shift into the next.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Encoded prompt characters kept in an API response key for readability
pub const PROMPT_PREFIX_LEN: usize = 50;

/// Key for a chat completion: the model id, the first
/// [`PROMPT_PREFIX_LEN`] characters of the base64-encoded prompt and the
/// SHA-256 of the whole prompt
pub fn api_response_key(model: &str, prompt: &str) -> String {
    let encoded = STANDARD.encode(prompt.as_bytes());
    let prefix: String = encoded.chars().take(PROMPT_PREFIX_LEN).collect();
    format!("{}_{}_{}", model, prefix, sha256_hex(prompt.as_bytes()))
}

pub fn calculation_key(text: &str, method: &str) -> String {
    format!("calc_{}_{}", length_prefixed(method), length_prefixed(text))
}

pub fn jafr_key(name: &str, mother_name: &str, date: &str) -> String {
    format!(
        "jafr_{}_{}_{}",
        length_prefixed(name),
        length_prefixed(mother_name),
        length_prefixed(date)
    )
}

fn length_prefixed(part: &str) -> String {
    format!("{}:{}", part.len(), part)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
