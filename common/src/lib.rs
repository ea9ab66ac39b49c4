pub mod config;
pub mod duty;
pub mod forecast;
pub mod store;
pub mod topics;
pub mod types;

pub use config::{AuthConfig, DutyCycleConfig, ForecastConfig, NetworkConfig, RuntimeConfig};
pub use duty::{DutyTable, LampCommand, Phase};
pub use forecast::{estimate_depreciation, DepreciationEstimate, LightSample, PredictedPoint};
pub use store::{valid_sensor_id, JsonStore, StoreError};
pub use topics::*;
pub use types::{lux_to_foot_candles, LampState, SensorReading};
