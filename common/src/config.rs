use serde::{Deserialize, Serialize};

/// Tuning for the light-depreciation estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub lights_on_lux: f64,
    pub floor_percent: f64,
    pub curve_points: usize,
    pub projection_margin: f64,
    pub min_samples: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lights_on_lux: 100.0,
            floor_percent: 80.0,
            curve_points: 100,
            projection_margin: 1.2,
            min_samples: 10,
        }
    }
}

impl ForecastConfig {
    pub fn sanitize(&mut self) {
        if !self.lights_on_lux.is_finite() || self.lights_on_lux < 0.0 {
            self.lights_on_lux = 100.0;
        }
        if !self.floor_percent.is_finite() {
            self.floor_percent = 80.0;
        }
        self.floor_percent = self.floor_percent.clamp(1.0, 99.0);
        self.curve_points = self.curve_points.clamp(2, 10_000);
        if !self.projection_margin.is_finite() || self.projection_margin < 1.0 {
            self.projection_margin = 1.2;
        }
        self.min_samples = self.min_samples.max(2);
    }
}

/// Daily lamp pattern: an inactive phase, then `repetitions` ON/OFF pairs
/// plus one trailing ON block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCycleConfig {
    pub start_minute: u32,
    pub on_minutes: u32,
    pub off_minutes: u32,
    pub repetitions: u32,
}

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self {
            start_minute: 5 * 60,
            on_minutes: 20,
            off_minutes: 20,
            repetitions: 10,
        }
    }
}

impl DutyCycleConfig {
    pub fn active_minutes(&self) -> u32 {
        self.repetitions * (self.on_minutes + self.off_minutes) + self.on_minutes
    }

    pub fn sanitize(&mut self) {
        // Bounds chosen so a single ON/OFF/ON block always fits in a day.
        self.on_minutes = self.on_minutes.clamp(1, 479);
        self.off_minutes = self.off_minutes.clamp(1, 480);
        self.repetitions = self.repetitions.clamp(1, 36);

        while self.repetitions > 1 && self.active_minutes() > 24 * 60 {
            self.repetitions -= 1;
        }
        let latest_start = 24 * 60 - self.active_minutes();
        self.start_minute = self.start_minute.min(latest_start);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

/// Dashboard session settings. An empty digest leaves the API open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub password_sha256: String,
    pub session_ttl_minutes: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password_sha256: String::new(),
            session_ttl_minutes: 12 * 60,
        }
    }
}

impl AuthConfig {
    pub fn sanitize(&mut self) {
        self.session_ttl_minutes = self.session_ttl_minutes.clamp(5, 7 * 24 * 60);
        if self.password_sha256.len() != 64
            || !self.password_sha256.chars().all(|c| c.is_ascii_hexdigit())
        {
            self.password_sha256.clear();
        } else {
            self.password_sha256 = self.password_sha256.to_ascii_lowercase();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub forecast: ForecastConfig,
    pub duty: DutyCycleConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            forecast: ForecastConfig::default(),
            duty: DutyCycleConfig::default(),
            network: NetworkConfig::default(),
            auth: AuthConfig::default(),
            timezone: "America/Bogota".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.forecast.sanitize();
        self.duty.sanitize();
        self.auth.sanitize();
        if self.timezone.trim().is_empty() {
            self.timezone = "America/Bogota".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_duty_cycle_is_seven_active_hours() {
        assert_eq!(DutyCycleConfig::default().active_minutes(), 420);
    }

    #[test]
    fn sanitize_keeps_active_block_inside_one_day() {
        let mut duty = DutyCycleConfig {
            start_minute: 23 * 60,
            on_minutes: 20,
            off_minutes: 20,
            repetitions: 10,
        };
        duty.sanitize();

        assert_eq!(duty.active_minutes(), 420);
        assert_eq!(duty.start_minute, 24 * 60 - 420);
    }

    #[test]
    fn sanitize_shrinks_oversized_patterns() {
        let mut duty = DutyCycleConfig {
            start_minute: 900,
            on_minutes: 700,
            off_minutes: 700,
            repetitions: 4,
        };
        duty.sanitize();

        assert!(duty.active_minutes() <= 24 * 60);
        assert!(duty.start_minute + duty.active_minutes() <= 24 * 60);
        assert_eq!(duty.repetitions, 1);
    }

    #[test]
    fn sanitize_rejects_malformed_password_digest() {
        let mut auth = AuthConfig {
            password_sha256: "not-a-digest".to_string(),
            session_ttl_minutes: 60,
        };
        auth.sanitize();
        assert_eq!(auth.password_sha256, "");

        let mut auth = AuthConfig {
            password_sha256: "A".repeat(64),
            session_ttl_minutes: 60,
        };
        auth.sanitize();
        assert_eq!(auth.password_sha256, "a".repeat(64));
    }
}
