use log::{info, warn};
use serde::Serialize;

use crate::{error::TelemetryError, hal::BatteryGauge};

pub const FUEL_GAUGE_ADDR: u8 = 0x36;
/// MAX17048 VCELL register, big-endian, 78.125 uV per LSB.
pub const FUEL_GAUGE_VCELL_REG: u8 = 0x02;

pub const RSSI_UNAVAILABLE_DBM: i32 = 99;
pub const CSQ_UNKNOWN: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    pub battery_mv: i32,
    pub rssi_dbm: i32,
}

pub fn vcell_to_millivolts(raw: u16) -> i32 {
    (u64::from(raw) * 78_125 / 1_000_000) as i32
}

pub fn csq_to_dbm(code: i32) -> i32 {
    if code == CSQ_UNKNOWN {
        0
    } else {
        code * 2 - 113
    }
}

pub fn parse_csq(response: &str) -> Result<i32, TelemetryError> {
    let (_, rest) = response
        .split_once("+CSQ:")
        .ok_or(TelemetryError::SignalUnreadable)?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse::<i32>()
        .map_err(|_| TelemetryError::SignalUnreadable)
}

pub fn read_battery_millivolts(gauge: &mut impl BatteryGauge) -> i32 {
    match gauge.read_vcell_raw() {
        Ok(raw) => {
            let mv = vcell_to_millivolts(raw);
            info!("Battery: {mv} mV");
            mv
        }
        Err(err) => {
            warn!("{}", TelemetryError::from(err));
            0
        }
    }
}
