use log::{error, info, warn};

use crate::{
    error::AttachError,
    hal::{ByteTransport, Clock, PowerKey},
    modem::CellularModem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRegistrationStatus {
    Unregistered,
    RegisteredHome,
    RegisteredRoaming,
    TimedOut,
}

impl NetworkRegistrationStatus {
    pub fn from_stat(stat: u8) -> Self {
        match stat {
            1 => Self::RegisteredHome,
            5 => Self::RegisteredRoaming,
            _ => Self::Unregistered,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::RegisteredHome | Self::RegisteredRoaming)
    }
}

pub fn parse_cereg(response: &str) -> Option<NetworkRegistrationStatus> {
    let (_, rest) = response.split_once("+CEREG:")?;
    let line = rest.lines().next()?;
    let mut fields = line.split(',').map(str::trim);
    let first = fields.next()?;
    let stat = fields.next().unwrap_or(first);
    stat.parse::<u8>()
        .ok()
        .map(NetworkRegistrationStatus::from_stat)
}

impl<T, K, C> CellularModem<T, K, C>
where
    T: ByteTransport,
    K: PowerKey,
    C: Clock,
{
    pub fn attach(&mut self) -> Result<(), AttachError> {
        self.power_on()?;

        if let Err(err) = self
            .engine
            .execute("AT+CFUN=1", "OK", self.config.at_timeout_ms)
        {
            warn!("radio enable failed, continuing: {err}");
        }

        match self.poll_registration() {
            NetworkRegistrationStatus::TimedOut => {
                error!("Network registration timeout");
                return Err(AttachError::RegistrationTimeout {
                    budget_ms: self.registration.budget_ms,
                });
            }
            status => info!("network registration: {status:?}"),
        }

        self.activate_pdp()
    }

    pub fn poll_registration(&mut self) -> NetworkRegistrationStatus {
        let started_ms = self.clock.now_ms();

        while self.clock.now_ms().saturating_sub(started_ms) < self.registration.budget_ms {
            let status = self.query_registration();
            if status.is_registered() {
                return status;
            }
            self.clock.delay_ms(self.registration.poll_interval_ms);
        }

        NetworkRegistrationStatus::TimedOut
    }

    pub fn query_registration(&mut self) -> NetworkRegistrationStatus {
        match self
            .engine
            .execute("AT+CEREG?", "OK", self.registration.query_timeout_ms)
        {
            Ok(reply) => {
                parse_cereg(&reply.response).unwrap_or(NetworkRegistrationStatus::Unregistered)
            }
            Err(_) => NetworkRegistrationStatus::Unregistered,
        }
    }

    fn activate_pdp(&mut self) -> Result<(), AttachError> {
        let define = format!("AT+CGDCONT=1,\"IP\",\"{}\"", self.config.apn);
        if let Err(err) = self
            .engine
            .execute(&define, "OK", self.config.at_timeout_ms)
        {
            warn!("PDP context definition failed: {err}");
        }

        self.engine
            .execute("AT+CGACT=1,1", "OK", self.config.pdp_activation_timeout_ms)
            .map(|_| ())
            .map_err(AttachError::PdpActivation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ModemConfig, RegistrationConfig},
        sim::{ManualClock, SimBehavior, SimModem, SimPowerKey},
    };
    use pretty_assertions::assert_eq;

    fn modem(behavior: SimBehavior) -> CellularModem<SimModem, SimPowerKey, ManualClock> {
        CellularModem::new(
            SimModem::new(behavior),
            SimPowerKey::default(),
            ManualClock::new(),
            ModemConfig::default(),
            RegistrationConfig::default(),
        )
    }

    #[test]
    fn registration_reply_parsing() {
        assert_eq!(
            parse_cereg("\r\n+CEREG: 0,1\r\n\r\nOK\r\n"),
            Some(NetworkRegistrationStatus::RegisteredHome)
        );
        assert_eq!(
            parse_cereg("+CEREG: 2,5,\"1A2B\",\"01C3D4E5\",7"),
            Some(NetworkRegistrationStatus::RegisteredRoaming)
        );
        assert_eq!(
            parse_cereg("+CEREG: 0,2\r\nOK"),
            Some(NetworkRegistrationStatus::Unregistered)
        );
        assert_eq!(parse_cereg("OK"), None);
    }

    #[test]
    fn attach_runs_full_sequence() {
        let mut modem = modem(SimBehavior::default());

        modem.attach().unwrap();

        let sim = modem.engine().transport();
        assert_eq!(
            sim.commands(),
            &[
                "AT",
                "AT",
                "AT",
                "ATE0",
                "AT+CFUN=1",
                "AT+CEREG?",
                "AT+CEREG?",
                "AT+CGDCONT=1,\"IP\",\"online.telia.se\"",
                "AT+CGACT=1,1",
            ]
        );
        assert_eq!(modem.power_key().levels(), &[true, false, true]);
    }

    #[test]
    fn roaming_counts_as_registered() {
        let mut modem = modem(SimBehavior {
            roaming: true,
            registration_polls: 0,
            ..SimBehavior::default()
        });

        assert_eq!(
            modem.poll_registration(),
            NetworkRegistrationStatus::RegisteredRoaming
        );
    }

    #[test]
    fn silent_modem_is_not_responding() {
        let mut modem = modem(SimBehavior {
            responsive: false,
            ..SimBehavior::default()
        });

        let err = modem.attach().unwrap_err();

        assert_eq!(err, AttachError::ModemNotResponding { budget_ms: 20_000 });
        assert_eq!(modem.engine().transport().count("AT"), 20);
        assert!(modem.engine().transport().count("AT+CFUN=1") == 0);
    }

    #[test]
    fn radio_enable_failure_is_tolerated() {
        let mut modem = modem(SimBehavior::default().failing("AT+CFUN"));

        assert!(modem.attach().is_ok());
    }

    #[test]
    fn registration_budget_is_bounded() {
        let mut modem = modem(SimBehavior {
            registration_polls: u32::MAX,
            ..SimBehavior::default()
        });

        let err = modem.attach().unwrap_err();

        assert_eq!(err, AttachError::RegistrationTimeout { budget_ms: 60_000 });
        assert_eq!(modem.engine().transport().registration_queries(), 20);
        assert_eq!(modem.engine().transport().count("AT+CGACT=1,1"), 0);
    }

    #[test]
    fn pdp_activation_error_is_reported() {
        let mut modem = modem(SimBehavior::default().failing("AT+CGACT=1,1"));

        let err = modem.attach().unwrap_err();

        assert!(matches!(err, AttachError::PdpActivation(_)));
    }
}
