//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Inbound messages per second allowed per player
pub const DEFAULT_MESSAGE_RATE_LIMIT: u32 = 120;

/// Per-player limiter for inbound socket messages
#[derive(Clone)]
pub struct PlayerRateLimiter {
    message_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new(messages_per_second: u32) -> Self {
        Self {
            message_limiter: create_limiter(messages_per_second),
        }
    }

    /// Check if a message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_RATE_LIMIT)
    }
}
