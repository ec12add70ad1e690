pub mod result_log;

pub use result_log::{LogAction, LogEntry, ResultLogger};
