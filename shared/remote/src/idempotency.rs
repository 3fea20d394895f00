use rand::RngCore;
use sha2::{Digest, Sha256};

/// Derives a stable idempotency key from a logical resource key, so a
/// retried create after an ambiguous failure resolves to the same remote
/// resource.
pub fn idempotency_key(logical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(logical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fresh random key for resources with no logical identity of their own.
pub fn fresh_idempotency_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_logical_keys_are_stable() {
        assert_eq!(idempotency_key("rollout-a"), idempotency_key("rollout-a"));
        assert_ne!(idempotency_key("rollout-a"), idempotency_key("rollout-b"));
    }

    #[test]
    fn test_fresh_keys_differ() {
        assert_ne!(fresh_idempotency_key(), fresh_idempotency_key());
    }
}
