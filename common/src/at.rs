use std::borrow::Cow;

use log::{info, warn};

use crate::{
    error::{AtError, HwError},
    hal::ByteTransport,
};

pub const ERROR_MARKER: &str = "ERROR";

pub const RESPONSE_CAPACITY: usize = 255;

const LINE_TERMINATOR: &[u8] = b"\r\n";
const READ_CHUNK: usize = 64;

#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    dropped: usize,
}

impl ResponseBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.dropped = 0;
    }

    pub fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity - self.bytes.len();
        let kept = data.len().min(room);
        self.bytes.extend_from_slice(&data[..kept]);
        self.dropped += data.len() - kept;
        kept
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.as_bytes();
        if needle.is_empty() {
            return true;
        }
        self.bytes.windows(needle.len()).any(|window| window == needle)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtOutcome {
    Matched,
    ErrorReply,
    Timeout,
    TransportFault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtTransaction {
    pub command: String,
    pub expected: String,
    pub outcome: AtOutcome,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtReply {
    pub response: String,
}

pub struct AtEngine<T> {
    transport: T,
    buffer: ResponseBuffer,
    read_slice_ms: u64,
    transcript: Vec<AtTransaction>,
}

impl<T: ByteTransport> AtEngine<T> {
    pub fn new(transport: T, read_slice_ms: u64) -> Self {
        Self::with_capacity(transport, read_slice_ms, RESPONSE_CAPACITY)
    }

    pub fn with_capacity(transport: T, read_slice_ms: u64, capacity: usize) -> Self {
        Self {
            transport,
            buffer: ResponseBuffer::with_capacity(capacity),
            read_slice_ms: read_slice_ms.max(1),
            transcript: Vec::new(),
        }
    }

    pub fn execute(
        &mut self,
        command: &str,
        expected: &str,
        timeout_ms: u64,
    ) -> Result<AtReply, AtError> {
        self.buffer.clear();

        if let Err(err) = self.send_line(command) {
            warn!("AT> {command} not sent: {err}");
            self.record(command, expected, AtOutcome::TransportFault);
            return Err(err.into());
        }
        info!("AT> {command}");

        let mut chunk = [0_u8; READ_CHUNK];
        let mut elapsed_ms = 0;

        while elapsed_ms < timeout_ms {
            let read = match self.transport.read(&mut chunk, self.read_slice_ms) {
                Ok(read) => read,
                Err(err) => {
                    warn!("AT read failed during `{command}`: {err}");
                    self.record(command, expected, AtOutcome::TransportFault);
                    return Err(err.into());
                }
            };

            if read > 0 {
                self.buffer.push(&chunk[..read]);

                // ERROR wins whenever both markers are in the buffer.
                if self.buffer.contains(ERROR_MARKER) {
                    warn!("AT error: {}", self.buffer.text().trim());
                    self.record(command, expected, AtOutcome::ErrorReply);
                    return Err(AtError::ErrorReply {
                        command: command.to_string(),
                    });
                }
                if self.buffer.contains(expected) {
                    let response = self.buffer.text().into_owned();
                    info!("AT< {}", response.trim());
                    self.record(command, expected, AtOutcome::Matched);
                    return Ok(AtReply { response });
                }
            }

            elapsed_ms += self.read_slice_ms;
        }

        if self.buffer.dropped() > 0 {
            warn!(
                "AT reply to `{command}` overflowed, {} byte(s) dropped",
                self.buffer.dropped()
            );
        }
        warn!("AT timeout ({command}), got: {}", self.buffer.text().trim());
        self.record(command, expected, AtOutcome::Timeout);
        Err(AtError::Timeout {
            command: command.to_string(),
            expected: expected.to_string(),
            timeout_ms,
        })
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), AtError> {
        self.transport.write_all(bytes)?;
        Ok(())
    }

    pub fn transcript(&self) -> &[AtTransaction] {
        &self.transcript
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send_line(&mut self, command: &str) -> Result<(), HwError> {
        self.transport.discard_input()?;

        let mut line = Vec::with_capacity(command.len() + LINE_TERMINATOR.len());
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(LINE_TERMINATOR);
        self.transport.write_all(&line)
    }

    fn record(&mut self, command: &str, expected: &str, outcome: AtOutcome) {
        self.transcript.push(AtTransaction {
            command: command.to_string(),
            expected: expected.to_string(),
            outcome,
            response: self.buffer.text().into_owned(),
        });
    }
}
