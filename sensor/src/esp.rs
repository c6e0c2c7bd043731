use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use esp_idf_hal::{
    delay::{Ets, TickType},
    gpio::{AnyIOPin, IOPin, Input, Output, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver, I2C0},
    uart::{config::Config as UartConfig, UartDriver, UART1},
    units::{FromValueType, Hertz},
};
use esp_idf_svc::{
    hal::prelude::Peripherals,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::EspError,
};
use log::{error, info, warn};

use trailcounter_common::{
    telemetry::{FUEL_GAUGE_ADDR, FUEL_GAUGE_VCELL_REG},
    BatteryGauge, Board, ByteTransport, CellularModem, CounterConfig, DeviceIdentity, HwError,
    MotionInput, PersistentCounters, PowerKey, RetainedCounters, SleepPlan, StdClock, WakeCause,
    WakeCycle,
};

const NVS_NAMESPACE: &str = "trailcounter";
const NVS_CONFIG_KEY: &str = "config_json";

const PIR_GPIO: i32 = 4;
const I2C_TIMEOUT_MS: u64 = 100;
const WATCHDOG_TIMEOUT_SEC: u32 = 300;

// Survives deep sleep, re-initialized from the image on a cold boot.
#[link_section = ".rtc.data"]
static mut RETAINED: RetainedCounters = RetainedCounters::EMPTY;

struct ModemUart {
    parts: Option<(UART1, AnyIOPin, AnyIOPin)>,
    baud_rate: u32,
    driver: Option<UartDriver<'static>>,
}

struct ModemPowerKey {
    pin: Option<AnyIOPin>,
    driver: Option<PinDriver<'static, AnyIOPin, Output>>,
}

struct FuelGauge {
    parts: Option<(I2C0, AnyIOPin, AnyIOPin)>,
    driver: Option<I2cDriver<'static>>,
}

struct PirInput {
    pin: PinDriver<'static, AnyIOPin, Input>,
}

fn hw_err(err: EspError) -> HwError {
    HwError::new(err.to_string())
}

impl ModemUart {
    fn driver(&mut self) -> Result<&UartDriver<'static>, HwError> {
        if self.driver.is_none() {
            let (uart, tx, rx) = self
                .parts
                .take()
                .ok_or_else(|| HwError::new("modem UART unavailable"))?;
            let config = UartConfig::new().baudrate(Hertz(self.baud_rate));
            let driver = UartDriver::new(
                uart,
                tx,
                rx,
                Option::<AnyIOPin>::None,
                Option::<AnyIOPin>::None,
                &config,
            )
            .map_err(hw_err)?;
            info!("modem UART up at {} baud", self.baud_rate);
            self.driver = Some(driver);
        }
        self.driver
            .as_ref()
            .ok_or_else(|| HwError::new("modem UART unavailable"))
    }
}

impl ByteTransport for ModemUart {
    fn discard_input(&mut self) -> Result<(), HwError> {
        self.driver()?.clear_rx().map_err(hw_err)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HwError> {
        let driver = self.driver()?;
        let mut rest = bytes;
        while !rest.is_empty() {
            let written = driver.write(rest).map_err(hw_err)?;
            rest = &rest[written..];
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize, HwError> {
        self.driver()?
            .read(buf, TickType::new_millis(timeout_ms).ticks())
            .map_err(hw_err)
    }
}

impl PowerKey for ModemPowerKey {
    fn set_level(&mut self, high: bool) -> Result<(), HwError> {
        if self.driver.is_none() {
            let pin = self
                .pin
                .take()
                .ok_or_else(|| HwError::new("PWRKEY pin unavailable"))?;
            let mut driver = PinDriver::output(pin).map_err(hw_err)?;
            driver.set_high().map_err(hw_err)?;
            self.driver = Some(driver);
        }

        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| HwError::new("PWRKEY pin unavailable"))?;
        if high {
            driver.set_high().map_err(hw_err)
        } else {
            driver.set_low().map_err(hw_err)
        }
    }
}

impl FuelGauge {
    /// The gauge sleeps once SDA and SCL have idled low; a rising edge on
    /// either line wakes it.
    fn pulse_bus_awake(sda: &mut AnyIOPin, scl: &mut AnyIOPin) -> Result<(), EspError> {
        let mut sda = PinDriver::output(sda)?;
        let mut scl = PinDriver::output(scl)?;
        sda.set_low()?;
        scl.set_low()?;
        Ets::delay_ms(1);
        sda.set_high()?;
        scl.set_high()?;
        Ets::delay_ms(2);
        Ok(())
    }
}

impl BatteryGauge for FuelGauge {
    fn wake(&mut self) {
        let Some((i2c, mut sda, mut scl)) = self.parts.take() else {
            return;
        };

        if let Err(err) = Self::pulse_bus_awake(&mut sda, &mut scl) {
            warn!("fuel gauge wake pulse failed: {err}");
        }

        let config = I2cConfig::new()
            .baudrate(100.kHz().into())
            .sda_enable_pullup(true)
            .scl_enable_pullup(true);
        match I2cDriver::new(i2c, sda, scl, &config) {
            Ok(driver) => self.driver = Some(driver),
            Err(err) => warn!("I2C bus init failed: {err}"),
        }
    }

    fn read_vcell_raw(&mut self) -> Result<u16, HwError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| HwError::new("I2C bus not initialized"))?;
        let mut data = [0_u8; 2];
        driver
            .write_read(
                FUEL_GAUGE_ADDR,
                &[FUEL_GAUGE_VCELL_REG],
                &mut data,
                TickType::new_millis(I2C_TIMEOUT_MS).ticks(),
            )
            .map_err(hw_err)?;
        Ok(u16::from_be_bytes(data))
    }

    fn release(&mut self) {
        self.driver = None;
    }
}

impl PirInput {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Down)?;
        Ok(Self { pin })
    }
}

impl MotionInput for PirInput {
    fn is_active(&mut self) -> bool {
        self.pin.is_high()
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let cause = wake_cause();
    let snapshot = load_retained();
    info!(
        "wake: {cause:?}, retained total={} batch={}",
        snapshot.total, snapshot.batch
    );

    let config = load_config();

    if let Err(err) = init_watchdog(WATCHDOG_TIMEOUT_SEC).and_then(|()| add_current_task_to_watchdog())
    {
        warn!("watchdog unavailable: {err:#}");
    }

    let plan = match run_cycle(&config, snapshot, cause) {
        Ok(plan) => plan,
        Err(err) => {
            error!("activation failed: {err:#}");
            SleepPlan::for_counters(snapshot, config.cycle.group_timeout_s)
        }
    };

    enter_deep_sleep(plan)
}

fn run_cycle(
    config: &CounterConfig,
    snapshot: PersistentCounters,
    cause: WakeCause,
) -> anyhow::Result<SleepPlan> {
    let identity = DeviceIdentity::from_mac(factory_mac()?);
    let Peripherals {
        pins, uart1, i2c0, ..
    } = Peripherals::take()?;

    let pir = PirInput::new(pins.gpio4.downgrade()).context("failed to configure PIR input")?;
    let uart = ModemUart {
        parts: Some((uart1, pins.gpio18.downgrade(), pins.gpio17.downgrade())),
        baud_rate: config.modem.baud_rate,
        driver: None,
    };
    let power_key = ModemPowerKey {
        pin: Some(pins.gpio41.downgrade()),
        driver: None,
    };
    let gauge = FuelGauge {
        parts: Some((i2c0, pins.gpio15.downgrade(), pins.gpio16.downgrade())),
        driver: None,
    };

    let modem = CellularModem::new(
        uart,
        power_key,
        StdClock::new(),
        config.modem.clone(),
        config.registration.clone(),
    );
    let mut board = Board::new(modem, gauge, pir);

    let outcome = WakeCycle::new(&config.cycle, &identity).transition(snapshot, cause, &mut board);
    store_retained(outcome.counters);

    if let Some(report) = &outcome.drain {
        info!(
            "drain: delivered={} attempts={} transactions={}",
            report.delivered,
            report.attempts,
            board.modem().engine().transcript().len()
        );
    }

    Ok(outcome.plan)
}

fn wake_cause() -> WakeCause {
    let cause = unsafe { esp_idf_svc::sys::esp_sleep_get_wakeup_cause() };
    match cause {
        esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::TimerExpired,
        esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => WakeCause::MotionTriggered,
        _ => WakeCause::PowerOnOrOther,
    }
}

fn factory_mac() -> anyhow::Result<[u8; 6]> {
    let mut mac = [0_u8; 6];
    let rc = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_efuse_mac_get_default failed with code {rc}"));
    }
    Ok(mac)
}

fn load_retained() -> PersistentCounters {
    // Read once at boot, before anything else runs.
    let retained = unsafe { core::ptr::addr_of!(RETAINED).read_volatile() };
    if !retained.is_valid() {
        info!("no retained counters; starting from zero");
    }
    retained.load()
}

fn store_retained(counters: PersistentCounters) {
    unsafe { core::ptr::addr_of_mut!(RETAINED).write_volatile(RetainedCounters::seal(counters)) };
}

fn load_config() -> CounterConfig {
    let loaded = EspDefaultNvsPartition::take()
        .map_err(anyhow::Error::from)
        .and_then(load_config_from_nvs);

    match loaded {
        Ok(Some(config)) => {
            info!("using config from NVS");
            config
        }
        Ok(None) => CounterConfig::default(),
        Err(err) => {
            warn!("failed to load config from NVS: {err:#}");
            CounterConfig::default()
        }
    }
}

fn load_config_from_nvs(partition: EspDefaultNvsPartition) -> anyhow::Result<Option<CounterConfig>> {
    let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
        Some(value) => Ok(Some(CounterConfig::from_json(value)?)),
        None => Ok(None),
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn enter_deep_sleep(plan: SleepPlan) -> ! {
    match plan.timer_s {
        Some(secs) => info!("entering deep sleep: PIR + {secs}s timer"),
        None => info!("entering deep sleep: PIR only"),
    }
    // Let the UART log drain before the clocks stop.
    thread::sleep(Duration::from_millis(20));

    unsafe {
        if let Some(timer_us) = plan.timer_us() {
            esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(timer_us);
        }
        if plan.wake_on_motion {
            esp_idf_svc::sys::rtc_gpio_pulldown_en(PIR_GPIO);
            esp_idf_svc::sys::esp_sleep_enable_ext0_wakeup(PIR_GPIO, 1);
        }
        esp_idf_svc::sys::esp_deep_sleep_start();
    }
}
