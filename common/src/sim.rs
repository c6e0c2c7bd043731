use std::collections::VecDeque;

use crate::{
    error::HwError,
    hal::{BatteryGauge, ByteTransport, Clock, MotionInput, PowerKey},
};

#[derive(Debug, Clone)]
pub struct SimBehavior {
    pub responsive: bool,
    pub boot_probes: u32,
    pub registration_polls: u32,
    pub roaming: bool,
    pub csq: Option<u8>,
    pub failing: Vec<String>,
    pub silent: Vec<String>,
    pub http_status: u16,
    pub reply_chunk: usize,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            responsive: true,
            boot_probes: 2,
            registration_polls: 1,
            roaming: false,
            csq: Some(20),
            failing: Vec::new(),
            silent: Vec::new(),
            http_status: 200,
            reply_chunk: 16,
        }
    }
}

impl SimBehavior {
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    pub fn silent(mut self, prefix: &str) -> Self {
        self.silent.push(prefix.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct SimModem {
    behavior: SimBehavior,
    echo: bool,
    line: Vec<u8>,
    pending: VecDeque<u8>,
    download: Option<usize>,
    commands: Vec<String>,
    body: Vec<u8>,
    probes_seen: u32,
    registration_queries: u32,
    http_open: bool,
    http_terminations: u32,
}

impl SimModem {
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            echo: true,
            ..Self::default()
        }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|sent| *sent == command).count()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn http_terminations(&self) -> u32 {
        self.http_terminations
    }

    pub fn registration_queries(&self) -> u32 {
        self.registration_queries
    }

    fn reply(&mut self, text: &str) {
        self.pending.extend(text.as_bytes());
    }

    fn handle_line(&mut self, command: String) {
        self.commands.push(command.clone());

        if !self.behavior.responsive {
            return;
        }
        if self.echo {
            self.reply(&format!("{command}\r\n"));
        }
        if self
            .behavior
            .silent
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return;
        }
        if self
            .behavior
            .failing
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            self.reply("\r\nERROR\r\n");
            return;
        }

        match command.as_str() {
            "AT" => {
                if self.probes_seen < self.behavior.boot_probes {
                    self.probes_seen += 1;
                    self.pending.clear();
                } else {
                    self.reply("\r\nOK\r\n");
                }
            }
            "ATE0" => {
                self.echo = false;
                self.pending.clear();
                self.reply("\r\nOK\r\n");
            }
            "AT+CEREG?" => {
                let stat = if self.registration_queries >= self.behavior.registration_polls {
                    if self.behavior.roaming {
                        5
                    } else {
                        1
                    }
                } else {
                    2
                };
                self.registration_queries += 1;
                self.reply(&format!("\r\n+CEREG: 0,{stat}\r\n\r\nOK\r\n"));
            }
            "AT+CSQ" => match self.behavior.csq {
                Some(code) => self.reply(&format!("\r\n+CSQ: {code},99\r\n\r\nOK\r\n")),
                None => self.reply("\r\nOK\r\n"),
            },
            "AT+HTTPINIT" => {
                if self.http_open {
                    self.reply("\r\nERROR\r\n");
                } else {
                    self.http_open = true;
                    self.reply("\r\nOK\r\n");
                }
            }
            "AT+HTTPTERM" => {
                self.http_terminations += 1;
                if std::mem::take(&mut self.http_open) {
                    self.reply("\r\nOK\r\n");
                } else {
                    self.reply("\r\nERROR\r\n");
                }
            }
            "AT+HTTPACTION=1" => {
                let status = self.behavior.http_status;
                self.reply(&format!("\r\nOK\r\n\r\n+HTTPACTION: 1,{status},2\r\n"));
            }
            _ => {
                if let Some(args) = command.strip_prefix("AT+HTTPDATA=") {
                    let length = args
                        .split(',')
                        .next()
                        .and_then(|length| length.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    self.body.clear();
                    self.download = Some(length);
                    self.reply("\r\nDOWNLOAD\r\n");
                } else {
                    self.reply("\r\nOK\r\n");
                }
            }
        }
    }
}

impl ByteTransport for SimModem {
    fn discard_input(&mut self) -> Result<(), HwError> {
        self.pending.clear();
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HwError> {
        let mut rest = bytes;

        if let Some(remaining) = self.download {
            let taken = remaining.min(rest.len());
            self.body.extend_from_slice(&rest[..taken]);
            rest = &rest[taken..];
            if remaining == taken {
                self.download = None;
                self.reply("\r\nOK\r\n");
            } else {
                self.download = Some(remaining - taken);
            }
        }

        for &byte in rest {
            match byte {
                b'\r' => {}
                b'\n' => {
                    let command = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    self.handle_line(command);
                }
                _ => self.line.push(byte),
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u64) -> Result<usize, HwError> {
        let count = buf
            .len()
            .min(self.behavior.reply_chunk.max(1))
            .min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now_ms: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn delay_ms(&mut self, ms: u64) {
        self.now_ms = self.now_ms.saturating_add(ms);
    }
}

#[derive(Debug, Default)]
pub struct SimPowerKey {
    levels: Vec<bool>,
}

impl SimPowerKey {
    pub fn levels(&self) -> &[bool] {
        &self.levels
    }
}

impl PowerKey for SimPowerKey {
    fn set_level(&mut self, high: bool) -> Result<(), HwError> {
        self.levels.push(high);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimMotion {
    active_reads: u32,
}

impl SimMotion {
    pub fn active_for(reads: u32) -> Self {
        Self {
            active_reads: reads,
        }
    }
}

impl MotionInput for SimMotion {
    fn is_active(&mut self) -> bool {
        if self.active_reads > 0 {
            self.active_reads -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct SimGauge {
    raw: Option<u16>,
    woken: bool,
    released: bool,
}

impl SimGauge {
    pub fn reading(raw: u16) -> Self {
        Self {
            raw: Some(raw),
            woken: false,
            released: false,
        }
    }

    pub fn absent() -> Self {
        Self {
            raw: None,
            woken: false,
            released: false,
        }
    }

    pub fn woken(&self) -> bool {
        self.woken
    }

    pub fn released(&self) -> bool {
        self.released
    }
}

impl BatteryGauge for SimGauge {
    fn wake(&mut self) {
        self.woken = true;
    }

    fn read_vcell_raw(&mut self) -> Result<u16, HwError> {
        self.raw.ok_or_else(|| HwError::new("fuel gauge did not acknowledge"))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
