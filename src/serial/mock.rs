use crate::error::AppError;
use crate::serial::SerialLink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockChunk {
    Bytes(Vec<u8>),
    Timeout,
    Fail(String),
}

impl MockChunk {
    pub fn text(text: &str) -> Self {
        MockChunk::Bytes(text.as_bytes().to_vec())
    }
}

/// Scripted serial link. Once the script runs out every read times out.
///
/// Clones share the same script, so a test can keep a handle and append chunks
/// after the link has been moved into a reader.
#[derive(Debug, Clone, Default)]
pub struct MockSerialLink {
    script: Arc<Mutex<VecDeque<MockChunk>>>,
}

impl MockSerialLink {
    pub fn new(chunks: Vec<MockChunk>) -> Self {
        Self {
            script: Arc::new(Mutex::new(chunks.into())),
        }
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        Self::new(
            lines
                .iter()
                .map(|line| MockChunk::text(&format!("{line}\n")))
                .collect(),
        )
    }

    pub fn push(&self, chunk: MockChunk) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(chunk);
        }
    }

    pub fn push_line(&self, line: &str) {
        self.push(MockChunk::text(&format!("{line}\n")));
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }
}

impl SerialLink for MockSerialLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, AppError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| AppError::Serial("mock script lock poisoned".to_string()))?;
        match script.pop_front() {
            Some(MockChunk::Bytes(bytes)) => {
                let count = bytes.len().min(buf.len());
                buf[..count].copy_from_slice(&bytes[..count]);
                if count < bytes.len() {
                    script.push_front(MockChunk::Bytes(bytes[count..].to_vec()));
                }
                Ok(count)
            }
            Some(MockChunk::Fail(reason)) => Err(AppError::Serial(reason)),
            Some(MockChunk::Timeout) | None => Err(AppError::SerialTimeout),
        }
    }
}
