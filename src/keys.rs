//! Store key derivation.
//!
//! Keys embed the identity or prompt verbatim: no trimming, case folding or
//! hashing, so `"Hello"` and `"hello "` are separate cache entries.

pub const RATE_COUNTER_PREFIX: &str = "IP_count_";
pub const CHAT_CACHE_PREFIX: &str = "chatapi_cache_";
pub const IMAGES_CACHE_PREFIX: &str = "dall_e_api_cache_";

/// Counter key for a client identity
pub fn rate_counter_key(identity: &str) -> String {
    format!("{}{}", RATE_COUNTER_PREFIX, identity)
}

/// Cache key for a request's text under the given namespace prefix
pub fn cache_key(prefix: &str, text: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + text.len());
    key.push_str(prefix);
    key.push_str(text);
    key
}
