use crate::error::AppError;
use crate::serial::{SerialLink, SerialSettings};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tracing::info;

/// The UPSPack's USB/TTL converter, 8N1 without flow control.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    pub fn open(settings: &SerialSettings) -> Result<Self, AppError> {
        let port = serialport::new(&settings.device, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
            .map_err(|err| {
                AppError::Serial(format!("failed to open {}: {err}", settings.device))
            })?;
        info!(
            device = settings.device.as_str(),
            baud_rate = settings.baud_rate,
            "Opened UPS serial port"
        );
        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AppError> {
        loop {
            match self.port.read(buf) {
                Ok(count) => return Ok(count),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    return Err(AppError::SerialTimeout);
                }
                Err(err) => return Err(AppError::Serial(err.to_string())),
            }
        }
    }
}
