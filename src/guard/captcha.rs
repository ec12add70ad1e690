//! One-time arithmetic challenges.
//!
//! A challenge is `Issued` until it is answered correctly (deleted), it expires
//! (deleted lazily or by the sweeper), or it is answered wrongly, in which case
//! the same id stays valid for another attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

use crate::clock::Clock;
use crate::sweeper::Sweep;

pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "×",
        }
    }

    /// `None` when the result would be negative.
    pub fn apply(&self, a: u32, b: u32) -> Option<u32> {
        match self {
            ArithmeticOp::Add => a.checked_add(b),
            ArithmeticOp::Subtract => a.checked_sub(b),
            ArithmeticOp::Multiply => a.checked_mul(b),
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub question: String,
    answer: String,
    pub expires_at: u64,
}

impl Challenge {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// What the client gets to see: never the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengePrompt {
    pub id: String,
    pub question: String,
}

pub struct ChallengeIssuer {
    challenges: DashMap<String, Challenge>,
    rng: Mutex<StdRng>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ChallengeIssuer {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::with_rng(clock, ttl, StdRng::from_entropy())
    }

    /// Deterministic question generation for tests. Ids still come from the OS RNG.
    pub fn seeded(clock: Arc<dyn Clock>, ttl: Duration, seed: u64) -> Self {
        Self::with_rng(clock, ttl, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, ttl: Duration, rng: StdRng) -> Self {
        Self {
            challenges: DashMap::new(),
            rng: Mutex::new(rng),
            ttl,
            clock,
        }
    }

    /// Issue a random challenge.
    pub fn generate(&self) -> ChallengePrompt {
        let (op, a, b) = {
            let mut rng = self.rng.lock();
            match rng.gen_range(0..3u8) {
                0 => (ArithmeticOp::Add, rng.gen_range(1..=20), rng.gen_range(1..=20)),
                1 => {
                    let a = rng.gen_range(1..=20);
                    (ArithmeticOp::Subtract, a, rng.gen_range(1..=a))
                }
                _ => (ArithmeticOp::Multiply, rng.gen_range(1..=10), rng.gen_range(1..=10)),
            }
        };
        self.issue(op, a, b)
    }

    /// Issue a challenge for a fixed operation. Subtraction operands are swapped
    /// if needed so the answer is never negative.
    pub fn issue(&self, op: ArithmeticOp, a: u32, b: u32) -> ChallengePrompt {
        let (a, b) = if op == ArithmeticOp::Subtract && b > a { (b, a) } else { (a, b) };
        let answer = op.apply(a, b).unwrap_or_default();
        let question = format!("What is {a} {op} {b}?");
        let id = new_challenge_id();

        let challenge = Challenge {
            id: id.clone(),
            question: question.clone(),
            answer: answer.to_string(),
            expires_at: self.clock.now_ms().saturating_add(self.ttl.as_millis() as u64),
        };
        self.challenges.insert(id.clone(), challenge);
        tracing::debug!(challenge_id = %id, "issued captcha challenge");

        ChallengePrompt { id, question }
    }

    /// Check an answer. A correct answer consumes the challenge; a wrong one leaves it
    /// in place for another try until it expires.
    pub fn verify(&self, id: &str, answer: &str) -> bool {
        let now = self.clock.now_ms();
        let expired = match self.challenges.get(id) {
            None => return false,
            Some(challenge) => challenge.is_expired(now),
        };
        if expired {
            self.challenges.remove(id);
            return false;
        }
        // remove_if makes the consume atomic against a concurrent correct answer
        let consumed = self
            .challenges
            .remove_if(id, |_, c| {
                !c.is_expired(now) && c.answer.eq_ignore_ascii_case(answer.trim())
            })
            .is_some();
        if consumed {
            tracing::debug!(challenge_id = %id, "captcha solved");
        }
        consumed
    }

    pub fn pending(&self) -> usize {
        self.challenges.len()
    }
}

impl Sweep for ChallengeIssuer {
    fn name(&self) -> &'static str {
        "captcha"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.challenges.len();
        self.challenges.retain(|_, c| !c.is_expired(now));
        before.saturating_sub(self.challenges.len())
    }
}

fn new_challenge_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
