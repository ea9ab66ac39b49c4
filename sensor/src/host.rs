use std::time::Duration;

use anyhow::Context;
use chrono::{Timelike, Utc};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use rack_common::{reading_topic, SensorReading, TOPIC_SENSOR_STATUS};

const DEVICE_IDS: [&str; 2] = ["rack-a-01", "rack-a-02"];

/// Peak output fades by this fraction of the initial value per day, so a
/// few days of data are enough for the dashboard forecast to latch on.
const LUX_DECAY_PER_DAY: f64 = 0.004;
const INITIAL_PEAK_LUX: f64 = 12_000.0;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("rack-sensor", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("sensor publisher started");

    let started = Utc::now();
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        let now = Utc::now();
        let elapsed_days = (now - started).num_seconds() as f64 / 86_400.0;

        for (index, device_id) in DEVICE_IDS.iter().enumerate() {
            // Hardware integration point: replace with BH1750 + DHT22
            // readings on the rack controller.
            let lux = simulated_lux(now.hour(), elapsed_days, index);
            let temperature_c = 21.0 + ((tick + index as u64) % 8) as f64 * 0.3;
            let humidity = 48.0 + ((tick + index as u64) % 6) as f64 * 0.8;

            let reading = SensorReading {
                taken_at: now,
                temperature_c,
                lux,
                humidity: Some(humidity),
            };

            let payload = serde_json::to_vec(&reading)
                .context("failed to serialize simulated reading")?;
            mqtt.publish(reading_topic(device_id), QoS::AtLeastOnce, false, payload)
                .await
                .with_context(|| format!("failed to publish reading for {device_id}"))?;
        }
    }
}

/// Bright during the grow window with a slow day-over-day fade, near dark
/// otherwise.
fn simulated_lux(hour: u32, elapsed_days: f64, device_index: usize) -> f64 {
    if !(5..12).contains(&hour) {
        return 2.0 + device_index as f64;
    }

    let peak = INITIAL_PEAK_LUX * (1.0 - LUX_DECAY_PER_DAY * elapsed_days).max(0.0);
    peak - device_index as f64 * 150.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn night_hours_read_near_dark() {
        assert!(simulated_lux(2, 0.0, 0) < 10.0);
        assert!(simulated_lux(13, 10.0, 1) < 10.0);
    }

    #[test]
    fn grow_window_fades_day_over_day() {
        let fresh = simulated_lux(8, 0.0, 0);
        let aged = simulated_lux(8, 50.0, 0);
        assert!(fresh > aged);
        assert!(aged > 0.0);
    }
}
