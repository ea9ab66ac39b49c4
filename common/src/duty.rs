use chrono::{DateTime, Duration, FixedOffset, Timelike};

use crate::config::DutyCycleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub start_minute: u32,
    pub end_minute: u32,
    pub on: bool,
}

/// Precomputed daily interval table for the lamp duty cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DutyTable {
    phases: Vec<Phase>,
    start_minute: u32,
    end_minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LampCommand {
    pub on: bool,
    /// Next instant at which the commanded state flips.
    pub next_change: DateTime<FixedOffset>,
}

impl DutyTable {
    pub fn build(config: &DutyCycleConfig) -> Self {
        let mut phases = Vec::with_capacity(config.repetitions as usize * 2 + 1);
        let mut cursor = config.start_minute;

        for _ in 0..config.repetitions {
            phases.push(Phase {
                start_minute: cursor,
                end_minute: cursor + config.on_minutes,
                on: true,
            });
            cursor += config.on_minutes;
            phases.push(Phase {
                start_minute: cursor,
                end_minute: cursor + config.off_minutes,
                on: false,
            });
            cursor += config.off_minutes;
        }
        phases.push(Phase {
            start_minute: cursor,
            end_minute: cursor + config.on_minutes,
            on: true,
        });
        cursor += config.on_minutes;

        Self {
            phases,
            start_minute: config.start_minute,
            end_minute: cursor,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn active_start_minute(&self) -> u32 {
        self.start_minute
    }

    pub fn active_end_minute(&self) -> u32 {
        self.end_minute
    }

    /// Commanded state at `now` and the boundary where it next flips.
    ///
    /// Deterministic in `now` alone, so repeated or late invocations
    /// converge on the same answer instead of accumulating drift.
    pub fn command_at(&self, now: DateTime<FixedOffset>) -> LampCommand {
        let second = now.num_seconds_from_midnight();
        let base = now.with_nanosecond(0).unwrap_or(now);
        let offset_to = |target_second: u32| {
            base + Duration::seconds(i64::from(target_second) - i64::from(second))
        };

        let start_second = self.start_minute * 60;
        let end_second = self.end_minute * 60;

        if second < start_second {
            return LampCommand {
                on: false,
                next_change: offset_to(start_second),
            };
        }
        if second >= end_second {
            return LampCommand {
                on: false,
                next_change: offset_to(start_second) + Duration::days(1),
            };
        }

        for phase in &self.phases {
            if second >= phase.start_minute * 60 && second < phase.end_minute * 60 {
                return LampCommand {
                    on: phase.on,
                    next_change: offset_to(phase.end_minute * 60),
                };
            }
        }

        LampCommand {
            on: false,
            next_change: offset_to(start_second) + Duration::days(1),
        }
    }
}
