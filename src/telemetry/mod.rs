pub mod frame;
pub mod reader;

pub use frame::{TelemetryRecord, parse_frame};
pub use reader::{RetryPolicy, TelemetryReader};
