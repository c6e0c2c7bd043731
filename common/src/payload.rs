use serde::Serialize;

use crate::{
    counters::PersistentCounters, error::UploadError, identity::DeviceIdentity,
    telemetry::TelemetrySample,
};

#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload<'a> {
    pub device_id: &'a str,
    pub total: u32,
    pub batch: u32,
    pub battery_mv: i32,
    pub rssi_dbm: i32,
}

impl<'a> UploadPayload<'a> {
    pub fn new(
        identity: &'a DeviceIdentity,
        counters: PersistentCounters,
        telemetry: TelemetrySample,
    ) -> Self {
        Self {
            device_id: identity.as_str(),
            total: counters.total,
            batch: counters.batch,
            battery_mv: telemetry.battery_mv,
            rssi_dbm: telemetry.rssi_dbm,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, UploadError> {
        serde_json::to_vec(self).map_err(|err| UploadError::Payload(err.to_string()))
    }
}
