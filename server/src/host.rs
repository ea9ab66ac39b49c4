use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use rack_common::{
    estimate_depreciation, sensor_id_from_topic, valid_sensor_id, DepreciationEstimate, DutyTable,
    ForecastConfig, JsonStore, LampState, LightSample, RuntimeConfig, SensorReading,
    TOPIC_READING_FILTER,
};

use crate::{
    auth::SessionStore,
    chart::{self, LightUnit},
    scheduler::LampScheduler,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 1024;

#[derive(Clone)]
struct AppState {
    store: JsonStore,
    sessions: Arc<SessionStore>,
    scheduler: LampScheduler,
    duty_table: DutyTable,
    forecast: ForecastConfig,
    timezone: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "expiresAtEpoch")]
    expires_at_epoch: i64,
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    start: Option<String>,
    end: Option<String>,
    units: Option<String>,
}

#[derive(Debug, Serialize)]
struct ForecastView {
    #[serde(rename = "crossingEpoch")]
    crossing_epoch: i64,
    #[serde(rename = "crossingDate")]
    crossing_date: String,
    #[serde(rename = "peakLux")]
    peak_lux: f64,
    #[serde(rename = "slopePercentPerDay")]
    slope_percent_per_day: f64,
    #[serde(rename = "predictedTimestamps")]
    predicted_timestamps: Vec<String>,
    #[serde(rename = "predictedPercent")]
    predicted_percent: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct SeriesResponse {
    #[serde(rename = "sensorId")]
    sensor_id: String,
    timestamps: Vec<String>,
    temperature: Vec<f64>,
    light: Vec<f64>,
    humidity: Vec<Option<f64>>,
    #[serde(rename = "currentTemperature")]
    current_temperature: Option<f64>,
    #[serde(rename = "currentLight")]
    current_light: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    forecast: Option<ForecastView>,
}

#[derive(Debug, Serialize)]
struct ChartResponse {
    temperature: chart::Figure,
    light: chart::Figure,
}

#[derive(Debug, Serialize)]
struct LampView {
    on: bool,
    #[serde(rename = "changedAtEpoch")]
    changed_at_epoch: Option<i64>,
    #[serde(rename = "nextChangeEpoch")]
    next_change_epoch: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    timezone: String,
    #[serde(rename = "timezoneValid")]
    timezone_valid: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = JsonStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("rack-server", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let duty_table = DutyTable::build(&runtime.duty);
    let scheduler = LampScheduler::new(
        store.clone(),
        mqtt.clone(),
        duty_table.clone(),
        runtime.timezone.clone(),
    );
    scheduler.spawn();

    let app_state = AppState {
        store,
        sessions: Arc::new(SessionStore::new(
            runtime.auth.password_sha256.clone(),
            runtime.auth.session_ttl_minutes,
        )),
        scheduler,
        duty_table,
        forecast: runtime.forecast.clone(),
        timezone: runtime.timezone.clone(),
    };

    mqtt.subscribe(TOPIC_READING_FILTER, QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to sensor readings")?;
    spawn_mqtt_loop(app_state.clone(), eventloop);

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/sensors", get(handle_list_sensors))
        .route("/api/sensor/{id}", get(handle_sensor_series))
        .route("/api/sensor/{id}/chart", get(handle_sensor_charts))
        .route("/api/lamp", get(handle_get_lamp))
        .route("/api/lamp/sync", post(handle_lamp_sync))
        .route("/api/time", get(handle_get_time))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("RACK_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dashboard server at {addr}"))?;

    info!("dashboard listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_reading_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("reading ingest error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_reading_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let Some(sensor_id) = sensor_id_from_topic(topic) else {
        return Ok(());
    };
    if !valid_sensor_id(sensor_id) {
        warn!("dropping reading for invalid sensor id {sensor_id:?}");
        return Ok(());
    }

    let reading: SensorReading =
        serde_json::from_slice(payload).context("malformed reading payload")?;
    if !reading.is_plausible() {
        warn!(sensor_id, "dropping implausible reading");
        return Ok(());
    }

    app_state
        .store
        .append_reading(sensor_id, &reading)
        .await
        .context("failed to persist reading")?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    if state.sessions.authorized(bearer_token(headers)) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or expired session token",
        ))
    }
}

async fn handle_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    if state.sessions.open_mode() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Dashboard runs in open mode; no login required",
        );
    }

    match state.sessions.login(&request.password) {
        Some(session) => Json(LoginResponse {
            token: session.token,
            expires_at_epoch: session.expires_at.timestamp(),
        })
        .into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "Invalid password"),
    }
}

async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.logout(token);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_list_sensors(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let sensors = state.store.list_sensors().await.unwrap_or_else(|err| {
        warn!("failed to list sensors: {err:#}");
        Vec::new()
    });
    Json(sensors).into_response()
}

async fn handle_sensor_series(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    Query(query): Query<SeriesQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    if !valid_sensor_id(&sensor_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid sensor id");
    }

    let (readings, forecast) = load_series(&state, &sensor_id, &query).await;
    let local_tz = local_offset(&state.timezone);

    let response = SeriesResponse {
        sensor_id,
        timestamps: readings
            .iter()
            .map(|r| r.taken_at.with_timezone(&local_tz).to_rfc3339())
            .collect(),
        temperature: readings.iter().map(|r| r.temperature_c).collect(),
        light: readings.iter().map(|r| r.lux).collect(),
        humidity: readings.iter().map(|r| r.humidity).collect(),
        current_temperature: readings.last().map(|r| r.temperature_c),
        current_light: readings.last().map(|r| r.lux),
        forecast: forecast.map(|estimate| forecast_view(&estimate, &state.timezone)),
    };
    Json(response).into_response()
}

async fn handle_sensor_charts(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    Query(query): Query<SeriesQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    if !valid_sensor_id(&sensor_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid sensor id");
    }

    let (readings, forecast) = load_series(&state, &sensor_id, &query).await;
    let unit = LightUnit::from_query(query.units.as_deref());
    let local_tz = local_offset(&state.timezone);

    let response = ChartResponse {
        temperature: chart::temperature_figure(&readings, local_tz),
        light: chart::light_figure(
            &readings,
            forecast.as_ref(),
            unit,
            local_tz,
            state.forecast.floor_percent,
        ),
    };
    Json(response).into_response()
}

async fn handle_get_lamp(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    Json(lamp_view(&state).await).into_response()
}

async fn handle_lamp_sync(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    state.scheduler.request_sync();
    Json(lamp_view(&state).await).into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    Json(TimeStatus {
        now_epoch: Utc::now().timestamp(),
        timezone: state.timezone.clone(),
        timezone_valid: state.timezone.parse::<Tz>().is_ok(),
    })
}

/// Readings plus forecast for one sensor, degraded to empty on store errors.
async fn load_series(
    state: &AppState,
    sensor_id: &str,
    query: &SeriesQuery,
) -> (Vec<SensorReading>, Option<DepreciationEstimate>) {
    let start = query
        .start
        .as_deref()
        .and_then(|raw| local_date_bound(&state.timezone, raw, false));
    let end = query
        .end
        .as_deref()
        .and_then(|raw| local_date_bound(&state.timezone, raw, true));

    let readings = state
        .store
        .load_readings(sensor_id, start, end)
        .await
        .unwrap_or_else(|err| {
            warn!(sensor_id, "failed to load readings: {err:#}");
            Vec::new()
        });

    let forecast = if readings.len() >= state.forecast.min_samples {
        let samples: Vec<LightSample> = readings
            .iter()
            .map(|r| LightSample {
                at: r.taken_at,
                lux: r.lux,
            })
            .collect();
        estimate_depreciation(&samples, &state.forecast)
    } else {
        None
    };

    (readings, forecast)
}

async fn lamp_view(state: &AppState) -> LampView {
    let lamp = state.store.lamp_state().await.unwrap_or_else(|err| {
        warn!("failed to read lamp state: {err:#}");
        LampState::default()
    });

    let next_change_epoch = now_in_timezone(&state.timezone)
        .map(|now| state.duty_table.command_at(now).next_change.timestamp());

    LampView {
        on: lamp.on,
        changed_at_epoch: lamp.changed_at.map(|at| at.timestamp()),
        next_change_epoch,
    }
}

fn forecast_view(estimate: &DepreciationEstimate, timezone: &str) -> ForecastView {
    let local_tz = local_offset(timezone);
    let local_crossing = estimate.crossing.with_timezone(&local_tz);

    ForecastView {
        crossing_epoch: estimate.crossing.timestamp(),
        crossing_date: local_crossing.format("%Y-%m-%d").to_string(),
        peak_lux: estimate.peak_lux,
        slope_percent_per_day: estimate.slope_percent_per_day,
        predicted_timestamps: estimate
            .curve
            .iter()
            .map(|p| p.at.with_timezone(&local_tz).to_rfc3339())
            .collect(),
        predicted_percent: estimate.curve.iter().map(|p| p.percent).collect(),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn now_in_timezone(timezone: &str) -> Option<DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

/// Current UTC offset of the configured timezone; UTC when unparseable.
fn local_offset(timezone: &str) -> chrono::FixedOffset {
    now_in_timezone(timezone)
        .map(|now| *now.offset())
        .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap())
}

/// Parses a `YYYY-MM-DD` query bound in the configured timezone; `end`
/// bounds cover through the last instant of the day. Unparseable input is
/// treated as no bound.
fn local_date_bound(timezone: &str, raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let tz: Tz = timezone.parse().ok()?;
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    let local = tz.from_local_datetime(&naive).earliest()?;
    Some(local.with_timezone(&Utc))
}
