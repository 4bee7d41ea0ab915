use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("cached value requested before the first refresh completed")]
    PrematureRead,
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("no USB/TTL serial device found")]
    DeviceNotFound,
    #[error("found {0} USB/TTL serial devices; configure [serial].device explicitly")]
    AmbiguousDevice(usize),
    #[error("serial error: {0}")]
    Serial(String),
    #[error("serial read timed out")]
    SerialTimeout,
    #[error("malformed telemetry frame: {0}")]
    MalformedFrame(String),
    #[error("failed to read UPS telemetry after {attempts} attempts: {last}")]
    ReadExhausted { attempts: u32, last: String },
    #[error("notification failed: {0}")]
    Notify(String),
    #[error("state lock poisoned")]
    StateLock,
}
