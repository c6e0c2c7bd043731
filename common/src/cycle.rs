use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::CycleConfig,
    counters::PersistentCounters,
    error::{AttachError, DrainError, UploadError},
    identity::DeviceIdentity,
    payload::UploadPayload,
    telemetry::TelemetrySample,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeCause {
    TimerExpired,
    MotionTriggered,
    PowerOnOrOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SleepPlan {
    pub wake_on_motion: bool,
    pub timer_s: Option<u64>,
}

impl SleepPlan {
    pub fn for_counters(counters: PersistentCounters, group_timeout_s: u64) -> Self {
        Self {
            wake_on_motion: true,
            timer_s: counters.has_pending().then_some(group_timeout_s),
        }
    }

    pub fn timer_us(&self) -> Option<u64> {
        self.timer_s.map(|secs| secs.saturating_mul(1_000_000))
    }
}

pub trait CycleHardware {
    fn begin_drain(&mut self) {}

    fn attach(&mut self) -> Result<(), AttachError>;

    fn sample_telemetry(&mut self) -> TelemetrySample;

    fn upload(&mut self, body: &[u8]) -> Result<(), UploadError>;

    fn shutdown_modem(&mut self) {}

    fn end_drain(&mut self) {}

    fn motion_active(&mut self) -> bool;

    fn delay_ms(&mut self, ms: u64);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempts: u32,
    pub delivered: bool,
    pub telemetry: Option<TelemetrySample>,
    pub last_error: Option<DrainError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub counters: PersistentCounters,
    pub plan: SleepPlan,
    pub drain: Option<DrainReport>,
}

pub struct WakeCycle<'a> {
    config: &'a CycleConfig,
    identity: &'a DeviceIdentity,
}

impl<'a> WakeCycle<'a> {
    pub fn new(config: &'a CycleConfig, identity: &'a DeviceIdentity) -> Self {
        Self { config, identity }
    }

    pub fn transition(
        &self,
        snapshot: PersistentCounters,
        cause: WakeCause,
        hw: &mut impl CycleHardware,
    ) -> CycleOutcome {
        let mut counters = snapshot;

        let drain = match cause {
            WakeCause::TimerExpired => {
                let report = self.drain(counters, hw);
                counters.close_batch();
                Some(report)
            }
            WakeCause::PowerOnOrOther if !self.config.count_power_on_as_detection => {
                info!("Power-on wake, not counted. total={}", counters.total);
                None
            }
            WakeCause::MotionTriggered | WakeCause::PowerOnOrOther => {
                counters.record_detection();
                info!(
                    "Detection! batch={} total={}",
                    counters.batch, counters.total
                );
                None
            }
        };

        self.wait_motion_idle(hw);

        let plan = SleepPlan::for_counters(counters, self.config.group_timeout_s);
        match plan.timer_s {
            Some(secs) => info!(
                "Sleep: PIR + {secs}s timer, batch={}",
                counters.batch
            ),
            None => info!("Sleep: PIR only, total={}", counters.total),
        }

        CycleOutcome {
            counters,
            plan,
            drain,
        }
    }

    fn drain(&self, counters: PersistentCounters, hw: &mut impl CycleHardware) -> DrainReport {
        info!(
            "Group timeout, sending batch={} total={}",
            counters.batch, counters.total
        );

        hw.begin_drain();

        let mut report = DrainReport::default();
        for attempt in 0..self.config.drain_attempts {
            if attempt > 0 {
                warn!("Retry {attempt}");
                hw.shutdown_modem();
                hw.delay_ms(self.config.retry_backoff_ms);
            }
            report.attempts += 1;

            match self.attempt(counters, hw) {
                Ok(telemetry) => {
                    report.delivered = true;
                    report.telemetry = Some(telemetry);
                    report.last_error = None;
                    break;
                }
                Err(err) => {
                    warn!("drain attempt {} failed: {err}", attempt + 1);
                    report.last_error = Some(err);
                }
            }
        }

        hw.end_drain();

        if report.delivered {
            info!("POST successful");
        } else {
            error!(
                "POST failed after {} attempt(s), batch of {} dropped",
                report.attempts, counters.batch
            );
        }
        report
    }

    fn attempt(
        &self,
        counters: PersistentCounters,
        hw: &mut impl CycleHardware,
    ) -> Result<TelemetrySample, DrainError> {
        hw.attach()?;
        let telemetry = hw.sample_telemetry();
        let body = UploadPayload::new(self.identity, counters, telemetry).to_bytes()?;
        hw.upload(&body)?;
        Ok(telemetry)
    }

    fn wait_motion_idle(&self, hw: &mut impl CycleHardware) {
        let step = self.config.pir_poll_ms.max(1);
        let mut waited = 0;
        while waited < self.config.pir_settle_ms && hw.motion_active() {
            hw.delay_ms(step);
            waited += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::AtError;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        BeginDrain,
        Attach,
        Telemetry,
        Upload(String),
        Shutdown,
        EndDrain,
        Delay(u64),
    }

    #[derive(Default)]
    struct FakeHardware {
        attach_results: VecDeque<Result<(), AttachError>>,
        upload_results: VecDeque<Result<(), UploadError>>,
        motion_reads: u32,
        calls: Vec<Call>,
    }

    impl FakeHardware {
        fn delays(&self) -> u64 {
            self.calls
                .iter()
                .map(|call| match call {
                    Call::Delay(ms) => *ms,
                    _ => 0,
                })
                .sum()
        }
    }

    impl CycleHardware for FakeHardware {
        fn begin_drain(&mut self) {
            self.calls.push(Call::BeginDrain);
        }

        fn attach(&mut self) -> Result<(), AttachError> {
            self.calls.push(Call::Attach);
            self.attach_results.pop_front().unwrap_or(Ok(()))
        }

        fn sample_telemetry(&mut self) -> TelemetrySample {
            self.calls.push(Call::Telemetry);
            TelemetrySample {
                battery_mv: 4_010,
                rssi_dbm: -71,
            }
        }

        fn upload(&mut self, body: &[u8]) -> Result<(), UploadError> {
            self.calls
                .push(Call::Upload(String::from_utf8_lossy(body).into_owned()));
            self.upload_results.pop_front().unwrap_or(Ok(()))
        }

        fn shutdown_modem(&mut self) {
            self.calls.push(Call::Shutdown);
        }

        fn end_drain(&mut self) {
            self.calls.push(Call::EndDrain);
        }

        fn motion_active(&mut self) -> bool {
            if self.motion_reads > 0 {
                self.motion_reads -= 1;
                true
            } else {
                false
            }
        }

        fn delay_ms(&mut self, ms: u64) {
            self.calls.push(Call::Delay(ms));
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_mac([0x28, 0x37, 0x2f, 0x2b, 0x62, 0xf8])
    }

    fn upload_failure() -> UploadError {
        UploadError::Step {
            step: crate::http::HttpStep::Action,
            source: AtError::Timeout {
                command: "AT+HTTPACTION=1".to_string(),
                expected: "+HTTPACTION:".to_string(),
                timeout_ms: 15_000,
            },
        }
    }

    #[test]
    fn power_on_counts_and_arms_timer() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware::default();

        let outcome = WakeCycle::new(&config, &identity).transition(
            PersistentCounters::default(),
            WakeCause::PowerOnOrOther,
            &mut hw,
        );

        assert_eq!(outcome.counters, PersistentCounters { total: 1, batch: 1 });
        assert_eq!(
            outcome.plan,
            SleepPlan {
                wake_on_motion: true,
                timer_s: Some(30)
            }
        );
        assert_eq!(outcome.plan.timer_us(), Some(30_000_000));
        assert!(outcome.drain.is_none());
        assert!(hw.calls.is_empty());
    }

    #[test]
    fn power_on_can_be_excluded() {
        let config = CycleConfig {
            count_power_on_as_detection: false,
            ..CycleConfig::default()
        };
        let identity = identity();
        let snapshot = PersistentCounters { total: 8, batch: 0 };

        let outcome = WakeCycle::new(&config, &identity).transition(
            snapshot,
            WakeCause::PowerOnOrOther,
            &mut FakeHardware::default(),
        );

        assert_eq!(outcome.counters, snapshot);
        assert_eq!(outcome.plan.timer_s, None);
    }

    #[test]
    fn motion_wakes_accumulate() {
        let config = CycleConfig::default();
        let identity = identity();
        let cycle = WakeCycle::new(&config, &identity);
        let mut counters = PersistentCounters { total: 40, batch: 0 };

        for _ in 0..7 {
            counters = cycle
                .transition(counters, WakeCause::MotionTriggered, &mut FakeHardware::default())
                .counters;
        }

        assert_eq!(counters, PersistentCounters { total: 47, batch: 7 });
    }

    #[test]
    fn successful_drain_sends_once_and_sleeps_on_pir_only() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware::default();

        let outcome = WakeCycle::new(&config, &identity).transition(
            PersistentCounters { total: 12, batch: 4 },
            WakeCause::TimerExpired,
            &mut hw,
        );

        assert_eq!(outcome.counters, PersistentCounters { total: 12, batch: 0 });
        assert_eq!(
            outcome.plan,
            SleepPlan {
                wake_on_motion: true,
                timer_s: None
            }
        );
        let report = outcome.drain.unwrap();
        assert_eq!(report.attempts, 1);
        assert!(report.delivered);
        assert_eq!(
            hw.calls,
            vec![
                Call::BeginDrain,
                Call::Attach,
                Call::Telemetry,
                Call::Upload(
                    r#"{"device_id":"28372f2b62f8","total":12,"batch":4,"battery_mv":4010,"rssi_dbm":-71}"#
                        .to_string()
                ),
                Call::EndDrain,
            ]
        );
    }

    #[test]
    fn retry_after_failed_attach_powers_down_and_backs_off() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware {
            attach_results: VecDeque::from([Err(AttachError::RegistrationTimeout {
                budget_ms: 60_000,
            })]),
            ..FakeHardware::default()
        };

        let outcome = WakeCycle::new(&config, &identity).transition(
            PersistentCounters { total: 3, batch: 3 },
            WakeCause::TimerExpired,
            &mut hw,
        );

        let report = outcome.drain.unwrap();
        assert_eq!(report.attempts, 2);
        assert!(report.delivered);
        assert_eq!(report.last_error, None);
        assert_eq!(
            &hw.calls[..5],
            &[
                Call::BeginDrain,
                Call::Attach,
                Call::Shutdown,
                Call::Delay(2_000),
                Call::Attach,
            ]
        );
    }

    #[test]
    fn exhausted_drain_still_closes_batch() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware {
            upload_results: VecDeque::from([Err(upload_failure()), Err(upload_failure())]),
            ..FakeHardware::default()
        };

        let outcome = WakeCycle::new(&config, &identity).transition(
            PersistentCounters { total: 9, batch: 2 },
            WakeCause::TimerExpired,
            &mut hw,
        );

        assert_eq!(outcome.counters, PersistentCounters { total: 9, batch: 0 });
        assert_eq!(outcome.plan.timer_s, None);
        let report = outcome.drain.unwrap();
        assert_eq!(report.attempts, 2);
        assert!(!report.delivered);
        assert_eq!(report.last_error, Some(DrainError::Upload(upload_failure())));
        assert_eq!(hw.calls.last(), Some(&Call::EndDrain));
        assert_eq!(
            hw.calls.iter().filter(|call| **call == Call::Attach).count(),
            2
        );
    }

    #[test]
    fn settle_wait_is_bounded() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware {
            motion_reads: u32::MAX,
            ..FakeHardware::default()
        };

        WakeCycle::new(&config, &identity).transition(
            PersistentCounters::default(),
            WakeCause::MotionTriggered,
            &mut hw,
        );

        assert_eq!(hw.delays(), 4_000);
    }

    #[test]
    fn settle_wait_stops_when_pir_drops() {
        let config = CycleConfig::default();
        let identity = identity();
        let mut hw = FakeHardware {
            motion_reads: 3,
            ..FakeHardware::default()
        };

        WakeCycle::new(&config, &identity).transition(
            PersistentCounters::default(),
            WakeCause::MotionTriggered,
            &mut hw,
        );

        assert_eq!(hw.delays(), 150);
    }

    #[test]
    fn counters_hold_invariants_over_mixed_wakes() {
        let config = CycleConfig::default();
        let identity = identity();
        let cycle = WakeCycle::new(&config, &identity);
        let pattern = [
            WakeCause::PowerOnOrOther,
            WakeCause::MotionTriggered,
            WakeCause::MotionTriggered,
            WakeCause::TimerExpired,
            WakeCause::TimerExpired,
            WakeCause::MotionTriggered,
            WakeCause::TimerExpired,
        ];

        let mut counters = PersistentCounters::default();
        for (round, cause) in pattern.iter().cycle().take(70).enumerate() {
            let mut hw = FakeHardware::default();
            if round % 3 == 0 {
                hw.upload_results =
                    VecDeque::from([Err(upload_failure()), Err(upload_failure())]);
            }
            let before = counters;
            let outcome = cycle.transition(counters, *cause, &mut hw);
            counters = outcome.counters;

            assert!(counters.total >= before.total);
            match cause {
                WakeCause::TimerExpired => {
                    assert_eq!(counters.batch, 0);
                    assert_eq!(outcome.plan.timer_s, None);
                }
                _ => {
                    assert_eq!(counters.total, before.total + 1);
                    assert_eq!(counters.batch, before.batch + 1);
                    assert_eq!(outcome.plan.timer_s, Some(30));
                }
            }
        }
        assert_eq!(counters.total, 40);
    }
}
