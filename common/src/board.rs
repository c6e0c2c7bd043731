use log::info;

use crate::{
    cycle::CycleHardware,
    error::{AttachError, UploadError},
    hal::{BatteryGauge, ByteTransport, Clock, MotionInput, PowerKey},
    modem::CellularModem,
    telemetry::{read_battery_millivolts, TelemetrySample},
};

pub struct Board<T, K, C, B, M> {
    modem: CellularModem<T, K, C>,
    gauge: B,
    motion: M,
    modem_powered: bool,
}

impl<T, K, C, B, M> Board<T, K, C, B, M>
where
    T: ByteTransport,
    K: PowerKey,
    C: Clock,
    B: BatteryGauge,
    M: MotionInput,
{
    pub fn new(modem: CellularModem<T, K, C>, gauge: B, motion: M) -> Self {
        Self {
            modem,
            gauge,
            motion,
            modem_powered: false,
        }
    }

    pub fn modem(&self) -> &CellularModem<T, K, C> {
        &self.modem
    }

    pub fn gauge(&self) -> &B {
        &self.gauge
    }
}

impl<T, K, C, B, M> CycleHardware for Board<T, K, C, B, M>
where
    T: ByteTransport,
    K: PowerKey,
    C: Clock,
    B: BatteryGauge,
    M: MotionInput,
{
    fn begin_drain(&mut self) {
        // The gauge settles while the modem attaches.
        self.gauge.wake();
    }

    fn attach(&mut self) -> Result<(), AttachError> {
        let result = self.modem.attach();
        self.modem_powered = !matches!(
            result,
            Err(AttachError::ModemNotResponding { .. } | AttachError::PowerKey(_))
        );
        result
    }

    fn sample_telemetry(&mut self) -> TelemetrySample {
        TelemetrySample {
            battery_mv: read_battery_millivolts(&mut self.gauge),
            rssi_dbm: self.modem.signal_strength_dbm(),
        }
    }

    fn upload(&mut self, body: &[u8]) -> Result<(), UploadError> {
        self.modem.upload(body)
    }

    fn shutdown_modem(&mut self) {
        if self.modem_powered {
            info!("powering modem down");
            self.modem.power_off();
            self.modem_powered = false;
        }
    }

    fn end_drain(&mut self) {
        self.gauge.release();
        self.shutdown_modem();
    }

    fn motion_active(&mut self) -> bool {
        self.motion.is_active()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.modem.clock_mut().delay_ms(ms);
    }
}
