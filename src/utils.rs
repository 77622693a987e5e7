use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seeded from the OS, or from `crypto.getRandomValues` in the browser through getrandom's js
/// feature.
pub fn crypto_rng() -> ChaCha20Rng {
    ChaCha20Rng::from_entropy()
}

pub fn current_time_ms() -> i64 {
    use time::OffsetDateTime;
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A short random alphanumeric string, used as the collision-resistant tail of generated ids.
pub fn random_suffix(len: usize) -> String {
    crypto_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix(8);
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_suffix(16), random_suffix(16));
    }

    #[test]
    fn test_current_time_is_millis() {
        // Anything after 2020 and before 2286 has 13 digits
        let now = current_time_ms();
        assert!(now > 1_577_836_800_000);
        assert!(now < 10_000_000_000_000);
    }
}
