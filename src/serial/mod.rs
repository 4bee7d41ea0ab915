use crate::error::AppError;

pub mod mock;
pub mod port;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl SerialSettings {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Byte source for UPS telemetry. Owned by a single reader, never shared.
pub trait SerialLink: Send {
    /// Read whatever bytes are available into `buf`, returning how many arrived.
    /// Implementations bound the wait and report [`AppError::SerialTimeout`].
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AppError>;
}

impl SerialLink for Box<dyn SerialLink> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AppError> {
        (**self).read_chunk(buf)
    }
}
