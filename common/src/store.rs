//! Month-partitioned JSON reading store.
//!
//! Layout under the data dir:
//!
//! ```text
//! readings/<sensor-id>/<YYYY-MM>.json   { "<epoch-ms>": { reading fields } }
//! lamp.json                             persisted lamp flag
//! runtime.json                          RuntimeConfig
//! ```
//!
//! Every estimator and scheduler input flows through here, keeping those
//! modules free of I/O.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    config::RuntimeConfig,
    types::{LampState, SensorReading},
};

const SENSOR_LIST_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Reading fields as stored under the epoch-ms key of a month document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredReading {
    #[serde(rename = "temperatureC")]
    temperature_c: f64,
    lux: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    humidity: Option<f64>,
}

type MonthDoc = BTreeMap<String, StoredReading>;

struct SensorListCache {
    listed_at: Instant,
    sensors: Vec<String>,
}

#[derive(Clone)]
pub struct JsonStore {
    readings_dir: Arc<PathBuf>,
    lamp_path: Arc<PathBuf>,
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
    sensor_list: Arc<Mutex<Option<SensorListCache>>>,
}

pub fn valid_sensor_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

impl JsonStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            readings_dir: Arc::new(data_dir.join("readings")),
            lamp_path: Arc::new(data_dir.join("lamp.json")),
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
            sensor_list: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("RACK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.rack"));
        Self::new(data_dir)
    }

    pub async fn load_runtime_config(&self) -> Result<RuntimeConfig, StoreError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.runtime_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(self.runtime_path.as_ref(), payload).await?;
        Ok(())
    }

    pub async fn lamp_state(&self) -> Result<LampState, StoreError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.lamp_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<LampState>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(LampState::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn set_lamp_state(&self, state: &LampState) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.lamp_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(self.lamp_path.as_ref(), payload).await?;
        Ok(())
    }

    /// Sorted sensor ids, served from a single-entry TTL cache.
    pub async fn list_sensors(&self) -> Result<Vec<String>, StoreError> {
        {
            let cache = self.sensor_list.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.listed_at.elapsed() < SENSOR_LIST_TTL {
                    return Ok(cached.sensors.clone());
                }
            }
        }

        let sensors = {
            let _guard = self.lock.lock().await;
            let mut sensors = Vec::new();
            match tokio::fs::read_dir(self.readings_dir.as_ref()).await {
                Ok(mut entries) => {
                    while let Some(entry) = entries.next_entry().await? {
                        if entry.file_type().await?.is_dir() {
                            if let Some(name) = entry.file_name().to_str() {
                                sensors.push(name.to_string());
                            }
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            sensors.sort();
            sensors
        };

        let mut cache = self.sensor_list.lock().await;
        *cache = Some(SensorListCache {
            listed_at: Instant::now(),
            sensors: sensors.clone(),
        });
        Ok(sensors)
    }

    pub async fn append_reading(
        &self,
        sensor_id: &str,
        reading: &SensorReading,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let dir = self.readings_dir.join(sensor_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.json", reading.taken_at.format("%Y-%m")));
        let mut doc = read_month_doc(&path).await?;
        doc.insert(
            reading.taken_at.timestamp_millis().to_string(),
            StoredReading {
                temperature_c: reading.temperature_c,
                lux: reading.lux,
                humidity: reading.humidity,
            },
        );
        tokio::fs::write(&path, serde_json::to_vec(&doc)?).await?;
        Ok(())
    }

    /// Readings for one sensor, sorted by timestamp, optionally bounded
    /// (inclusive on both ends). Malformed epoch-ms keys are skipped.
    pub async fn load_readings(
        &self,
        sensor_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        let _guard = self.lock.lock().await;

        let mut readings = Vec::new();
        for path in month_files(&self.readings_dir.join(sensor_id)).await? {
            let doc = read_month_doc(&path).await?;
            for (key, stored) in doc {
                let Some(taken_at) = parse_ms_key(&key) else {
                    continue;
                };
                if start.map_or(false, |s| taken_at < s) || end.map_or(false, |e| taken_at > e) {
                    continue;
                }
                readings.push(SensorReading {
                    taken_at,
                    temperature_c: stored.temperature_c,
                    lux: stored.lux,
                    humidity: stored.humidity,
                });
            }
        }

        readings.sort_by_key(|r| r.taken_at);
        Ok(readings)
    }

    pub async fn count_readings_before(
        &self,
        sensor_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;

        let mut count = 0;
        for path in month_files(&self.readings_dir.join(sensor_id)).await? {
            let doc = read_month_doc(&path).await?;
            count += doc
                .keys()
                .filter_map(|key| parse_ms_key(key))
                .filter(|at| *at < cutoff)
                .count();
        }
        Ok(count)
    }

    /// Deletes up to `limit` readings older than `cutoff`, oldest month
    /// files first. Returns how many were removed; emptied month files are
    /// unlinked.
    pub async fn delete_readings_before(
        &self,
        sensor_id: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;

        let mut removed = 0;
        for path in month_files(&self.readings_dir.join(sensor_id)).await? {
            if removed >= limit {
                break;
            }

            let mut doc = read_month_doc(&path).await?;
            let doomed: Vec<String> = doc
                .iter()
                .filter(|(key, _)| parse_ms_key(key).is_some_and(|at| at < cutoff))
                .map(|(key, _)| key.clone())
                .take(limit - removed)
                .collect();
            if doomed.is_empty() {
                continue;
            }

            for key in &doomed {
                doc.remove(key);
            }
            if doc.is_empty() {
                tokio::fs::remove_file(&path).await?;
            } else {
                tokio::fs::write(&path, serde_json::to_vec(&doc)?).await?;
            }
            removed += doomed.len();
        }
        Ok(removed)
    }
}

async fn read_month_doc(path: &std::path::Path) -> Result<MonthDoc, StoreError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(MonthDoc::new()),
        Err(err) => Err(err.into()),
    }
}

/// Month documents for one sensor, sorted by file name (oldest first).
async fn month_files(dir: &std::path::Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    files.sort();
    Ok(files)
}

fn parse_ms_key(key: &str) -> Option<DateTime<Utc>> {
    let ms = key.parse::<i64>().ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fresh_store(name: &str) -> JsonStore {
        let dir = std::env::temp_dir().join(format!("rack-store-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        JsonStore::new(dir)
    }

    fn reading(ymd: (i32, u32, u32), hms: (u32, u32, u32), lux: f64) -> SensorReading {
        SensorReading {
            taken_at: Utc
                .with_ymd_and_hms(ymd.0, ymd.1, ymd.2, hms.0, hms.1, hms.2)
                .unwrap(),
            temperature_c: 22.0,
            lux,
            humidity: None,
        }
    }

    #[tokio::test]
    async fn readings_come_back_sorted_across_months() {
        let store = fresh_store("sorted");

        let newer = reading((2026, 4, 2), (8, 0, 0), 900.0);
        let older = reading((2026, 3, 30), (8, 0, 0), 950.0);
        store.append_reading("r1", &newer).await.unwrap();
        store.append_reading("r1", &older).await.unwrap();

        let loaded = store.load_readings("r1", None, None).await.unwrap();
        assert_eq!(loaded, vec![older, newer]);
    }

    #[tokio::test]
    async fn range_bounds_are_inclusive() {
        let store = fresh_store("range");
        for day in 1..=5 {
            store
                .append_reading("r1", &reading((2026, 3, day), (12, 0, 0), 900.0))
                .await
                .unwrap();
        }

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let loaded = store
            .load_readings("r1", Some(start), Some(end))
            .await
            .unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.first().unwrap().taken_at, start);
        assert_eq!(loaded.last().unwrap().taken_at, end);
    }

    #[tokio::test]
    async fn unknown_sensor_loads_empty() {
        let store = fresh_store("unknown");
        assert_eq!(store.load_readings("nope", None, None).await.unwrap(), []);
        assert_eq!(store.list_sensors().await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn lamp_state_defaults_off_and_round_trips() {
        let store = fresh_store("lamp");
        assert_eq!(store.lamp_state().await.unwrap(), LampState::default());

        let state = LampState {
            on: true,
            changed_at: Some(Utc.with_ymd_and_hms(2026, 3, 14, 5, 0, 0).unwrap()),
        };
        store.set_lamp_state(&state).await.unwrap();
        assert_eq!(store.lamp_state().await.unwrap(), state);
    }

    #[tokio::test]
    async fn deletes_in_batches_and_reports_counts() {
        let store = fresh_store("purge");
        for day in 1..=5 {
            store
                .append_reading("r1", &reading((2026, 2, day), (12, 0, 0), 900.0))
                .await
                .unwrap();
        }
        store
            .append_reading("r1", &reading((2026, 3, 1), (12, 0, 0), 900.0))
            .await
            .unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            store.count_readings_before("r1", cutoff).await.unwrap(),
            5
        );

        assert_eq!(
            store.delete_readings_before("r1", cutoff, 2).await.unwrap(),
            2
        );
        assert_eq!(
            store.delete_readings_before("r1", cutoff, 2).await.unwrap(),
            2
        );
        assert_eq!(
            store.delete_readings_before("r1", cutoff, 2).await.unwrap(),
            1
        );
        assert_eq!(
            store.delete_readings_before("r1", cutoff, 2).await.unwrap(),
            0
        );

        let left = store.load_readings("r1", None, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(
            left[0].taken_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn malformed_month_keys_are_skipped() {
        let store = fresh_store("malformed");
        store
            .append_reading("r1", &reading((2026, 3, 1), (12, 0, 0), 900.0))
            .await
            .unwrap();

        let path = store.readings_dir.join("r1").join("2026-03.json");
        let raw = std::fs::read_to_string(&path).unwrap();
        let patched = raw.replacen('{', r#"{"garbage": {"temperatureC": 1.0, "lux": 2.0},"#, 1);
        std::fs::write(&path, patched).unwrap();

        let loaded = store.load_readings("r1", None, None).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn runtime_config_defaults_then_round_trips() {
        let store = fresh_store("runtime");
        assert_eq!(
            store.load_runtime_config().await.unwrap(),
            crate::config::RuntimeConfig::default()
        );

        let mut runtime = crate::config::RuntimeConfig::default();
        runtime.timezone = "America/Lima".to_string();
        runtime.duty.start_minute = 6 * 60;
        store.save_runtime_config(&runtime).await.unwrap();

        assert_eq!(store.load_runtime_config().await.unwrap(), runtime);
    }

    #[test]
    fn sensor_id_validation() {
        assert!(valid_sensor_id("rack-a_03"));
        assert!(!valid_sensor_id(""));
        assert!(!valid_sensor_id("../escape"));
        assert!(!valid_sensor_id("has space"));
    }
}
