use std::{
    collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use home_rules_common::{
    command_topic, input_kind, ControlKey, ControlMode, Coordinator, RawReading, RuntimeConfig,
    StoredState, Trigger, TOPIC_CMD_CONTROL_FILTER, TOPIC_CMD_CONTROL_PREFIX, TOPIC_CMD_EVALUATE,
    TOPIC_CMD_MODE, TOPIC_CONTROLLER_EVALUATION, TOPIC_CONTROLLER_STATE, TOPIC_INPUT_CLIMATE,
    TOPIC_INPUT_GENERATION, TOPIC_INPUT_GRID, TOPIC_INPUT_HUMIDITY, TOPIC_INPUT_INVERTER,
    TOPIC_INPUT_TEMPERATURE, TOPIC_INPUT_TIMER,
};

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Mutex<Coordinator>>,
    runtime: Arc<RuntimeConfig>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let stored = store.load_state().await.unwrap_or_else(|err| {
        warn!("failed to load controller state from store: {err:#}");
        StoredState::default()
    });
    let coordinator = Coordinator::from_stored(stored);
    info!(
        mode = coordinator.controls().mode().as_str(),
        last = ?coordinator.session().last,
        "restored controller state"
    );

    let network = runtime.network.clone().with_env_overrides();
    let mut mqtt_options =
        MqttOptions::new("home-rules-controller", network.mqtt_host, network.mqtt_port);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user, network.mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        coordinator: Arc::new(Mutex::new(coordinator)),
        runtime: Arc::new(runtime),
        mqtt,
        store,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_evaluation_loop(app_state.clone());
    spawn_status_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/control", post(handle_set_control))
        .route("/api/evaluate", post(handle_evaluate))
        .route("/api/diagnostics", get(handle_get_diagnostics))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

const SUBSCRIPTIONS: [&str; 10] = [
    TOPIC_INPUT_CLIMATE,
    TOPIC_INPUT_TIMER,
    TOPIC_INPUT_INVERTER,
    TOPIC_INPUT_GENERATION,
    TOPIC_INPUT_GRID,
    TOPIC_INPUT_TEMPERATURE,
    TOPIC_INPUT_HUMIDITY,
    TOPIC_CMD_MODE,
    TOPIC_CMD_CONTROL_FILTER,
    TOPIC_CMD_EVALUATE,
];

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in SUBSCRIPTIONS {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

/// Clean sessions drop subscriptions, so every (re)connect subscribes again.
/// Runs on its own task: the request channel is drained by the poll loop.
fn spawn_subscribe(mqtt: AsyncClient) {
    tokio::spawn(async move {
        if let Err(err) = subscribe_topics(&mqtt).await {
            warn!("mqtt subscribe failed: {err:#}");
        }
    });
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    spawn_subscribe(app_state.mqtt.clone());
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

fn spawn_evaluation_loop(app_state: AppState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(app_state.runtime.eval_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Let retained readings arrive before the first evaluation.
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(err) = run_evaluation(&app_state, Trigger::Poll).await {
                warn!("evaluation failed: {err:#}");
            }
        }
    });
}

fn spawn_status_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let payload = {
                let coordinator = app_state.coordinator.lock().await;
                serde_json::to_vec(&coordinator.status())
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

/// One full tick: snapshot, decide, actuate, commit and persist, all under
/// the coordinator lock.
async fn run_evaluation(app_state: &AppState, trigger: Trigger) -> anyhow::Result<()> {
    let mut coordinator = app_state.coordinator.lock().await;

    let outcome = match coordinator.plan(&app_state.runtime, trigger, Utc::now()) {
        Ok(plan) => {
            for command in &plan.commands {
                let body = serde_json::to_vec(command)?;
                app_state
                    .mqtt
                    .publish(command_topic(command), QoS::AtLeastOnce, false, body)
                    .await
                    .with_context(|| format!("failed to send {command:?}"))?;
                info!("sent appliance command: {command:?}");
            }
            coordinator.commit(plan)
        }
        Err(err) => Err(err),
    };

    app_state
        .store
        .save_state(&coordinator.to_stored())
        .await
        .context("failed to persist controller state")?;

    let evaluation = outcome?;
    debug!(
        mode = %evaluation.record.mode,
        reason = %evaluation.record.reason,
        "evaluation complete"
    );

    let record = serde_json::to_vec(&evaluation.record)?;
    app_state
        .mqtt
        .publish(TOPIC_CONTROLLER_EVALUATION, QoS::AtMostOnce, false, record)
        .await
        .context("failed to publish evaluation record")?;

    if let (Some(notification), Some(topic)) = (
        evaluation.notification,
        app_state.runtime.notification_topic.as_deref(),
    ) {
        let body = serde_json::to_vec(&notification)?;
        if let Err(err) = app_state
            .mqtt
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
        {
            warn!("notification publish failed: {err}");
        }
    }

    Ok(())
}

fn spawn_evaluation(app_state: &AppState, trigger: Trigger) {
    let app_state = app_state.clone();
    tokio::spawn(async move {
        if let Err(err) = run_evaluation(&app_state, trigger).await {
            warn!("{trigger:?} evaluation failed: {err:#}");
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    if let Some(kind) = input_kind(&topic) {
        let reading = RawReading::from_payload(&message);
        app_state
            .coordinator
            .lock()
            .await
            .record_reading(kind, reading);
        return Ok(());
    }

    // Evaluations run on their own task so this loop keeps polling while
    // commands are published.
    match topic.as_str() {
        TOPIC_CMD_MODE => {
            if let Some(mode) = ControlMode::parse(&message) {
                if apply_control_change(app_state, |c| c.set_mode(mode)).await? {
                    spawn_evaluation(app_state, Trigger::ControlMode);
                }
            }
        }
        TOPIC_CMD_EVALUATE => spawn_evaluation(app_state, Trigger::Manual),
        _ => {
            let key = topic
                .strip_prefix(TOPIC_CMD_CONTROL_PREFIX)
                .and_then(ControlKey::parse);
            if let (Some(key), Some(value)) = (key, parse_switch(&message)) {
                if apply_control_change(app_state, |c| c.set_control(key, value)).await? {
                    spawn_evaluation(app_state, Trigger::Control);
                }
            }
        }
    }

    Ok(())
}

/// Applies a control change and persists it when something changed.
async fn apply_control_change(
    app_state: &AppState,
    change: impl FnOnce(&mut Coordinator) -> bool,
) -> anyhow::Result<bool> {
    let mut coordinator = app_state.coordinator.lock().await;
    if !change(&mut *coordinator) {
        return Ok(false);
    }
    app_state.store.save_state(&coordinator.to_stored()).await?;
    Ok(true)
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.coordinator.lock().await.status();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = ControlMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'Disabled', 'Dry Run', 'Live' or 'Aggressive'",
        );
    };

    match apply_control_change(&state, |c| c.set_mode(mode)).await {
        Ok(true) => {
            if let Err(err) = run_evaluation(&state, Trigger::ControlMode).await {
                warn!("evaluation after mode change failed: {err:#}");
            }
        }
        Ok(false) => {}
        Err(err) => {
            warn!("failed to persist mode update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist controller state",
            );
        }
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_control(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(key) = params.get("key") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'key' parameter");
    };
    let Some(key) = ControlKey::parse(key) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid key. Use 'enabled', 'cooling_enabled', 'aggressive_cooling' or 'dry_run'",
        );
    };
    let Some(value) = params.get("value").and_then(|value| parse_switch(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid 'value'. Use 'on' or 'off'");
    };

    match apply_control_change(&state, |c| c.set_control(key, value)).await {
        Ok(true) => {
            if let Err(err) = run_evaluation(&state, Trigger::Control).await {
                warn!("evaluation after control change failed: {err:#}");
            }
        }
        Ok(false) => {}
        Err(err) => {
            warn!("failed to persist control update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist controller state",
            );
        }
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_evaluate(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(err) = run_evaluation(&state, Trigger::Manual).await {
        warn!("manual evaluation failed: {err:#}");
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &format!("{err:#}"));
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let diagnostics = state
        .coordinator
        .lock()
        .await
        .diagnostics(&state.runtime.parameters);
    Json(diagnostics)
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HOME_RULES_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.home_rules"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_state(&self) -> anyhow::Result<StoredState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(self.state_path.as_ref()).await {
            Ok(raw) => Ok(StoredState::from_json(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(StoredState::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, state: &StoredState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = state.to_json()?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
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
