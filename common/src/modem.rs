use log::{error, info, warn};

use crate::{
    at::AtEngine,
    config::{ModemConfig, RegistrationConfig},
    error::AttachError,
    hal::{ByteTransport, Clock, PowerKey},
    telemetry::{csq_to_dbm, parse_csq, RSSI_UNAVAILABLE_DBM},
};

pub struct CellularModem<T, K, C> {
    pub(crate) engine: AtEngine<T>,
    pub(crate) power_key: K,
    pub(crate) clock: C,
    pub(crate) config: ModemConfig,
    pub(crate) registration: RegistrationConfig,
}

impl<T, K, C> CellularModem<T, K, C>
where
    T: ByteTransport,
    K: PowerKey,
    C: Clock,
{
    pub fn new(
        transport: T,
        power_key: K,
        clock: C,
        config: ModemConfig,
        registration: RegistrationConfig,
    ) -> Self {
        Self {
            engine: AtEngine::new(transport, config.read_slice_ms),
            power_key,
            clock,
            config,
            registration,
        }
    }

    pub fn engine(&self) -> &AtEngine<T> {
        &self.engine
    }

    pub fn power_key(&self) -> &K {
        &self.power_key
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn power_on(&mut self) -> Result<(), AttachError> {
        self.power_key.set_level(true)?;
        self.clock.delay_ms(self.config.power_key_pre_high_ms);
        self.power_key.set_level(false)?;
        self.clock.delay_ms(self.config.power_key_pulse_ms);
        self.power_key.set_level(true)?;

        let probe_timeout = self.config.power_on_probe_timeout_ms;
        for _ in 0..self.config.power_on_probes {
            self.clock.delay_ms(self.config.power_on_probe_interval_ms);
            if self.engine.execute("AT", "OK", probe_timeout).is_ok() {
                if let Err(err) = self.engine.execute("ATE0", "OK", probe_timeout) {
                    warn!("echo not disabled: {err}");
                }
                return Ok(());
            }
        }

        error!("Modem not responding");
        Err(AttachError::ModemNotResponding {
            budget_ms: u64::from(self.config.power_on_probes)
                * (self.config.power_on_probe_interval_ms + probe_timeout),
        })
    }

    pub fn power_off(&mut self) {
        let timeout = self.config.at_timeout_ms;
        if let Err(err) = self.engine.execute("AT+CGACT=0,1", "OK", timeout) {
            warn!("PDP deactivation failed: {err}");
        }
        if let Err(err) = self.engine.execute("AT+CPOF", "OK", timeout) {
            warn!("modem power-off command failed: {err}");
        }
        self.clock.delay_ms(self.config.power_off_settle_ms);
    }

    pub fn signal_strength_dbm(&mut self) -> i32 {
        let reply = match self
            .engine
            .execute("AT+CSQ", "OK", self.config.at_timeout_ms)
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Could not read signal quality: {err}");
                return RSSI_UNAVAILABLE_DBM;
            }
        };

        match parse_csq(&reply.response) {
            Ok(code) => {
                let dbm = csq_to_dbm(code);
                info!("RSSI: {dbm} (CSQ {code})");
                dbm
            }
            Err(err) => {
                warn!("{err}");
                RSSI_UNAVAILABLE_DBM
            }
        }
    }
}
