pub mod analyze;
pub mod cache;
pub mod clock;
pub mod config;
pub mod discover;
pub mod guard;
pub mod http_client;
pub mod orchestrator;
pub mod output;
pub mod sweeper;

// re-exports for embedding hosts
pub use crate::orchestrator::{
    CaptchaSubmission, CaptchaVerdict, Operation, ReconOrchestrator, ReconRequest, ReconResponse,
};
