use std::fmt;

use log::{info, warn};

use crate::{
    at::{AtEngine, AtReply},
    error::{AtError, UploadError},
    hal::{ByteTransport, Clock, PowerKey},
    modem::CellularModem,
};

pub const HTTP_ACTION_MARKER: &str = "+HTTPACTION:";
const HTTP_METHOD_POST: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStep {
    Init,
    SetUrl,
    SetContentType,
    AnnounceBody,
    WriteBody,
    Action,
}

impl fmt::Display for HttpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "HTTPINIT",
            Self::SetUrl => "HTTPPARA URL",
            Self::SetContentType => "HTTPPARA CONTENT",
            Self::AnnounceBody => "HTTPDATA",
            Self::WriteBody => "body write",
            Self::Action => "HTTPACTION",
        };
        f.write_str(name)
    }
}

/// An initialized modem HTTP service. `AT+HTTPTERM` is sent exactly once,
/// from [`HttpSession::close`] or on drop, whichever comes first.
pub struct HttpSession<'m, T: ByteTransport> {
    engine: &'m mut AtEngine<T>,
    at_timeout_ms: u64,
    terminated: bool,
}

impl<'m, T: ByteTransport> HttpSession<'m, T> {
    pub fn open(engine: &'m mut AtEngine<T>, at_timeout_ms: u64) -> Result<Self, UploadError> {
        let mut session = Self {
            engine,
            at_timeout_ms,
            terminated: false,
        };
        session.step(HttpStep::Init, "AT+HTTPINIT", "OK", at_timeout_ms)?;
        Ok(session)
    }

    pub fn set_parameter(
        &mut self,
        step: HttpStep,
        name: &str,
        value: &str,
    ) -> Result<(), UploadError> {
        let command = format!("AT+HTTPPARA=\"{name}\",\"{value}\"");
        self.step(step, &command, "OK", self.at_timeout_ms)
            .map(|_| ())
    }

    pub fn send_body(&mut self, body: &[u8], window_ms: u64) -> Result<(), UploadError> {
        let command = format!("AT+HTTPDATA={},{window_ms}", body.len());
        self.step(HttpStep::AnnounceBody, &command, "DOWNLOAD", self.at_timeout_ms)?;

        self.engine
            .write_raw(body)
            .map_err(|source| UploadError::Step {
                step: HttpStep::WriteBody,
                source,
            })
    }

    pub fn post(&mut self, timeout_ms: u64) -> Result<Option<u16>, UploadError> {
        let command = format!("AT+HTTPACTION={HTTP_METHOD_POST}");
        let reply = self.step(HttpStep::Action, &command, HTTP_ACTION_MARKER, timeout_ms)?;
        Ok(parse_action_status(&reply.response))
    }

    pub fn close(mut self) -> Result<(), AtError> {
        self.terminate()
    }

    fn step(
        &mut self,
        step: HttpStep,
        command: &str,
        expected: &str,
        timeout_ms: u64,
    ) -> Result<AtReply, UploadError> {
        self.engine
            .execute(command, expected, timeout_ms)
            .map_err(|source| UploadError::Step { step, source })
    }

    fn terminate(&mut self) -> Result<(), AtError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.engine
            .execute("AT+HTTPTERM", "OK", self.at_timeout_ms)
            .map(|_| ())
    }
}

impl<T: ByteTransport> Drop for HttpSession<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!("HTTP service termination failed: {err}");
        }
    }
}

pub fn parse_action_status(response: &str) -> Option<u16> {
    let (_, rest) = response.split_once(HTTP_ACTION_MARKER)?;
    let line = rest.lines().next()?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return None;
    }
    fields[1].parse().ok()
}

impl<T, K, C> CellularModem<T, K, C>
where
    T: ByteTransport,
    K: PowerKey,
    C: Clock,
{
    pub fn upload(&mut self, body: &[u8]) -> Result<(), UploadError> {
        let Self {
            engine,
            clock,
            config,
            ..
        } = self;

        let mut session = HttpSession::open(engine, config.at_timeout_ms)?;
        session.set_parameter(HttpStep::SetUrl, "URL", &config.api_url)?;
        session.set_parameter(HttpStep::SetContentType, "CONTENT", &config.content_type)?;
        session.send_body(body, config.http_data_window_ms)?;
        clock.delay_ms(config.http_settle_ms);

        match session.post(config.http_action_timeout_ms)? {
            Some(status) => info!("HTTP POST completed with status {status}"),
            None => info!("HTTP POST completed"),
        }

        if let Err(err) = session.close() {
            warn!("HTTP service termination failed: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        at::AtOutcome,
        config::{ModemConfig, RegistrationConfig},
        sim::{ManualClock, SimBehavior, SimModem, SimPowerKey},
    };
    use pretty_assertions::assert_eq;

    const BODY: &[u8] = br#"{"device_id":"001122334455","total":3,"batch":3}"#;

    fn attached_modem(behavior: SimBehavior) -> CellularModem<SimModem, SimPowerKey, ManualClock> {
        CellularModem::new(
            SimModem::new(SimBehavior {
                boot_probes: 0,
                ..behavior
            }),
            SimPowerKey::default(),
            ManualClock::new(),
            ModemConfig::default(),
            RegistrationConfig::default(),
        )
    }

    #[test]
    fn upload_runs_ordered_steps() {
        let mut modem = attached_modem(SimBehavior::default());

        modem.upload(BODY).unwrap();

        let sim = modem.engine().transport();
        assert_eq!(
            sim.commands(),
            &[
                "AT+HTTPINIT".to_string(),
                "AT+HTTPPARA=\"URL\",\"http://webhook.site/2cd9319d-ce88-475d-b3e8-cb9f9d9c7afe\""
                    .to_string(),
                "AT+HTTPPARA=\"CONTENT\",\"application/json\"".to_string(),
                format!("AT+HTTPDATA={},5000", BODY.len()),
                "AT+HTTPACTION=1".to_string(),
                "AT+HTTPTERM".to_string(),
            ]
        );
        assert_eq!(sim.body(), BODY);
        assert_eq!(sim.http_terminations(), 1);
        assert_eq!(modem.clock().now_ms(), 1_000);
    }

    #[test]
    fn missing_download_prompt_still_terminates_once() {
        let mut modem = attached_modem(SimBehavior::default().failing("AT+HTTPDATA"));

        let err = modem.upload(BODY).unwrap_err();

        assert_eq!(err.step(), Some(HttpStep::AnnounceBody));
        let sim = modem.engine().transport();
        assert_eq!(sim.http_terminations(), 1);
        assert_eq!(sim.count("AT+HTTPACTION=1"), 0);
        assert_eq!(sim.commands().last().map(String::as_str), Some("AT+HTTPTERM"));
    }

    #[test]
    fn failed_init_still_terminates_once() {
        let mut modem = attached_modem(SimBehavior::default().failing("AT+HTTPINIT"));

        let err = modem.upload(BODY).unwrap_err();

        assert_eq!(err.step(), Some(HttpStep::Init));
        assert_eq!(modem.engine().transport().http_terminations(), 1);
    }

    #[test]
    fn missing_completion_marker_fails_after_action_timeout() {
        let mut modem = attached_modem(SimBehavior::default().silent("AT+HTTPACTION"));

        let err = modem.upload(BODY).unwrap_err();

        assert_eq!(err.step(), Some(HttpStep::Action));
        let action = modem
            .engine()
            .transcript()
            .iter()
            .find(|tx| tx.command == "AT+HTTPACTION=1")
            .unwrap();
        assert_eq!(action.outcome, AtOutcome::Timeout);
        assert_eq!(modem.engine().transport().http_terminations(), 1);
    }

    #[test]
    fn termination_failure_does_not_fail_upload() {
        let mut modem = attached_modem(SimBehavior::default().failing("AT+HTTPTERM"));

        assert!(modem.upload(BODY).is_ok());
        assert_eq!(modem.engine().transport().count("AT+HTTPTERM"), 1);
    }

    #[test]
    fn action_status_parsing() {
        assert_eq!(parse_action_status("\r\n+HTTPACTION: 1,200,2\r\n"), Some(200));
        assert_eq!(parse_action_status("+HTTPACTION: 1,404,0"), Some(404));
        assert_eq!(parse_action_status("+HTTPACTION: 1,20"), None);
        assert_eq!(parse_action_status("OK"), None);
    }
}
