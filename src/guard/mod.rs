pub mod captcha;
pub mod rate_limiter;

pub use captcha::{ChallengeIssuer, ChallengePrompt};
pub use rate_limiter::{RateLimitInfo, RateLimiter};
