//! Lamp duty-cycle job.
//!
//! One logical job drives the grow lamp: each run recomputes the commanded
//! state from the wall clock, persists and publishes it, then arms a single
//! wake-up at the next ON/OFF boundary. Because every run derives state from
//! the clock alone, late wake-ups and duplicate sync requests converge on
//! the correct state instead of compounding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use tokio::sync::Notify;
use tracing::{info, warn};

use rack_common::{DutyTable, JsonStore, LampState, TOPIC_LAMP_SET};

use crate::host::now_in_timezone;

/// The single pending wake-up of the lamp job.
pub struct JobSlot {
    pending: Mutex<Option<DateTime<Utc>>>,
    notify: Notify,
}

impl JobSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Arms the slot for `due`, replacing any differing pending wake-up.
    /// Returns `false` when an identical wake-up is already pending.
    pub fn arm(&self, due: DateTime<Utc>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if *pending == Some(due) {
            return false;
        }
        *pending = Some(due);
        self.notify.notify_one();
        true
    }

    pub fn due(&self) -> Option<DateTime<Utc>> {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps until the armed instant, tracking re-arms as they happen.
    pub async fn wait(&self) {
        loop {
            let Some(due) = self.due() else {
                self.notify.notified().await;
                continue;
            };

            let now = Utc::now();
            if due <= now {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                if *pending == Some(due) {
                    *pending = None;
                }
                return;
            }

            let sleep_for = (due - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.notify.notified() => {}
            }
        }
    }
}

#[derive(Clone)]
pub struct LampScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: JsonStore,
    mqtt: AsyncClient,
    table: DutyTable,
    timezone: String,
    slot: JobSlot,
}

impl LampScheduler {
    pub fn new(store: JsonStore, mqtt: AsyncClient, table: DutyTable, timezone: String) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                mqtt,
                table,
                timezone,
                slot: JobSlot::new(),
            }),
        }
    }

    /// Asks the job to recompute immediately.
    pub fn request_sync(&self) {
        self.inner.slot.arm(Utc::now());
    }

    pub fn spawn(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.run().await });
    }

    async fn run(&self) {
        loop {
            let Some(now_local) = now_in_timezone(&self.inner.timezone) else {
                warn!(
                    "invalid timezone {:?}; lamp job retrying in 60s",
                    self.inner.timezone
                );
                tokio::time::sleep(Duration::from_secs(60)).await;
                continue;
            };

            let command = self.inner.table.command_at(now_local);
            self.apply(command.on).await;

            let due = command.next_change.with_timezone(&Utc);
            if self.inner.slot.arm(due) {
                info!(on = command.on, next_change = %command.next_change, "lamp boundary armed");
            }
            self.inner.slot.wait().await;
        }
    }

    async fn apply(&self, on: bool) {
        let previous = match self.inner.store.lamp_state().await {
            Ok(state) => state,
            Err(err) => {
                warn!("failed to read lamp state: {err:#}");
                LampState::default()
            }
        };

        if previous.on != on {
            let state = LampState {
                on,
                changed_at: Some(Utc::now()),
            };
            if let Err(err) = self.inner.store.set_lamp_state(&state).await {
                warn!("failed to persist lamp state: {err:#}");
            }
            info!(on, "lamp state changed");
        }

        // Retained so the lamp device converges after its own restarts.
        if let Err(err) = self
            .inner
            .mqtt
            .publish(
                TOPIC_LAMP_SET,
                QoS::AtLeastOnce,
                true,
                LampState::command_str(on),
            )
            .await
        {
            warn!("lamp command publish failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn arming_twice_with_the_same_target_is_a_noop() {
        let slot = JobSlot::new();
        let due = Utc::now() + ChronoDuration::minutes(10);

        assert!(slot.arm(due));
        assert!(!slot.arm(due));
        assert_eq!(slot.due(), Some(due));
    }

    #[test]
    fn arming_a_new_target_replaces_the_pending_one() {
        let slot = JobSlot::new();
        let first = Utc::now() + ChronoDuration::minutes(10);
        let second = first + ChronoDuration::minutes(20);

        assert!(slot.arm(first));
        assert!(slot.arm(second));
        assert_eq!(slot.due(), Some(second));
    }

    #[tokio::test]
    async fn wait_returns_for_a_due_target_and_clears_it() {
        let slot = JobSlot::new();
        slot.arm(Utc::now() - ChronoDuration::seconds(1));

        slot.wait().await;
        assert_eq!(slot.due(), None);
    }

    #[tokio::test]
    async fn wait_blocks_until_rearmed_to_an_earlier_instant() {
        let slot = Arc::new(JobSlot::new());
        slot.arm(Utc::now() + ChronoDuration::hours(1));

        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        slot.arm(Utc::now());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should resolve after re-arm")
            .unwrap();
    }
}
