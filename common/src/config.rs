use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModemConfig {
    pub baud_rate: u32,
    pub apn: String,
    pub api_url: String,
    pub content_type: String,
    pub at_timeout_ms: u64,
    pub read_slice_ms: u64,
    pub power_key_pre_high_ms: u64,
    pub power_key_pulse_ms: u64,
    pub power_on_probe_interval_ms: u64,
    pub power_on_probe_timeout_ms: u64,
    pub power_on_probes: u32,
    pub pdp_activation_timeout_ms: u64,
    pub http_data_window_ms: u64,
    pub http_settle_ms: u64,
    pub http_action_timeout_ms: u64,
    pub power_off_settle_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            apn: "online.telia.se".to_string(),
            api_url: "http://webhook.site/2cd9319d-ce88-475d-b3e8-cb9f9d9c7afe".to_string(),
            content_type: "application/json".to_string(),
            at_timeout_ms: 2_000,
            read_slice_ms: 100,
            power_key_pre_high_ms: 100,
            power_key_pulse_ms: 1_500,
            power_on_probe_interval_ms: 500,
            power_on_probe_timeout_ms: 500,
            power_on_probes: 20,
            pdp_activation_timeout_ms: 10_000,
            http_data_window_ms: 5_000,
            http_settle_ms: 1_000,
            http_action_timeout_ms: 15_000,
            power_off_settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationConfig {
    pub budget_ms: u64,
    pub query_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            budget_ms: 60_000,
            query_timeout_ms: 1_000,
            poll_interval_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    pub group_timeout_s: u64,
    pub pir_settle_ms: u64,
    pub pir_poll_ms: u64,
    pub drain_attempts: u32,
    pub retry_backoff_ms: u64,
    pub count_power_on_as_detection: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            group_timeout_s: 30,
            pir_settle_ms: 4_000,
            pir_poll_ms: 50,
            drain_attempts: 2,
            retry_backoff_ms: 2_000,
            count_power_on_as_detection: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CounterConfig {
    pub modem: ModemConfig,
    pub registration: RegistrationConfig,
    pub cycle: CycleConfig,
}

impl CounterConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(json)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        let defaults = ModemConfig::default();
        let modem = &mut self.modem;

        if modem.baud_rate == 0 {
            modem.baud_rate = defaults.baud_rate;
        }
        if modem.api_url.trim().is_empty() {
            modem.api_url = defaults.api_url;
        }
        if modem.apn.trim().is_empty() {
            modem.apn = defaults.apn;
        }
        if modem.content_type.trim().is_empty() {
            modem.content_type = defaults.content_type;
        }
        modem.read_slice_ms = modem.read_slice_ms.clamp(10, 1_000);
        modem.power_on_probes = modem.power_on_probes.max(1);

        let registration = &mut self.registration;
        registration.poll_interval_ms = registration.poll_interval_ms.max(100);
        registration.query_timeout_ms = registration.query_timeout_ms.max(100);

        let cycle = &mut self.cycle;
        cycle.group_timeout_s = cycle.group_timeout_s.clamp(1, 86_400);
        cycle.pir_poll_ms = cycle.pir_poll_ms.clamp(10, 1_000);
        cycle.drain_attempts = cycle.drain_attempts.clamp(1, 5);
    }
}
