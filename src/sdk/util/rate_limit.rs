use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Provider quota used when nothing is configured.
pub const DEFAULT_PER_MINUTE: u32 = 40;

const DEFAULT_QUOTA: NonZeroU32 = match NonZeroU32::new(DEFAULT_PER_MINUTE) {
    Some(n) => n,
    None => panic!("DEFAULT_PER_MINUTE must be non-zero"),
};

/// A direct limiter allowing `per_minute` geocoding calls. Zero falls back to the default.
pub fn geocode_limiter(per_minute: u32) -> Limiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(DEFAULT_QUOTA);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_allowed_up_to_quota() {
        let limiter = geocode_limiter(3);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn zero_uses_default_quota() {
        let limiter = geocode_limiter(0);
        for _ in 0..DEFAULT_PER_MINUTE {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
