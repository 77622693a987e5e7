use crate::queue::QueueItem;

/// Capped exponential backoff between delivery attempts of a single queue item.
///
/// The delay after `n` failures is `min(max_ms, base_ms * 2^min(n, cap_exponent))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub max_ms: i64,
    pub cap_exponent: u32,
}

impl BackoffPolicy {
    pub fn delay_ms(&self, attempts: u32) -> i64 {
        let exponent = attempts.min(self.cap_exponent);
        // Anything past 2^62 overflows once multiplied by a non trivial base anyway
        let multiplier = if exponent >= 62 {
            i64::MAX
        } else {
            1i64 << exponent
        };

        self.base_ms.saturating_mul(multiplier).min(self.max_ms)
    }

    /// Items that have never failed are always eligible. Otherwise enough time has to have
    /// passed since the last failure.
    pub fn is_eligible(&self, item: &QueueItem, now_ms: i64) -> bool {
        match item.last_attempt_at() {
            None => true,
            Some(last_attempt_at) => {
                now_ms.saturating_sub(last_attempt_at) >= self.delay_ms(item.attempts())
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            max_ms: 60_000,
            cap_exponent: 5,
        }
    }
}
