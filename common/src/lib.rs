pub mod at;
pub mod board;
pub mod config;
pub mod counters;
pub mod cycle;
pub mod error;
pub mod hal;
pub mod http;
pub mod identity;
pub mod modem;
pub mod network;
pub mod payload;
pub mod sim;
pub mod telemetry;

pub use at::{AtEngine, AtOutcome, AtTransaction};
pub use board::Board;
pub use config::{CounterConfig, CycleConfig, ModemConfig, RegistrationConfig};
pub use counters::{PersistentCounters, RetainedCounters};
pub use cycle::{CycleHardware, CycleOutcome, DrainReport, SleepPlan, WakeCause, WakeCycle};
pub use error::{AtError, AttachError, DrainError, HwError, TelemetryError, UploadError};
pub use hal::{BatteryGauge, ByteTransport, Clock, MotionInput, PowerKey, StdClock};
pub use identity::DeviceIdentity;
pub use modem::CellularModem;
pub use network::NetworkRegistrationStatus;
pub use telemetry::TelemetrySample;
