use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

use home_rules_common::{input_topic, InputKind, NetworkConfig, RawReading, TOPIC_SENSOR_STATUS};

/// Ticks in one simulated day.
const DAY_TICKS: u64 = 48;
const PEAK_GENERATION_KW: f32 = 7.5;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let network = NetworkConfig::default().with_env_overrides();
    let mut mqtt_options =
        MqttOptions::new("home-rules-sensor", network.mqtt_host, network.mqtt_port);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user, network.mqtt_pass);
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

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        for (kind, reading) in simulated_readings(tick) {
            let payload = serde_json::to_vec(&reading)?;
            mqtt.publish(input_topic(kind), QoS::AtLeastOnce, true, payload)
                .await
                .with_context(|| format!("failed to publish {kind} reading"))?;
        }
        debug!(tick, "published simulated readings");
    }
}

fn simulated_readings(tick: u64) -> Vec<(InputKind, RawReading)> {
    let generation_kw = daylight(tick) * PEAK_GENERATION_KW;
    let house_load_kw = 1.2 + ((tick % 5) as f32 * 0.3);
    let grid_w = ((house_load_kw - generation_kw) * 1_000.0).max(0.0);
    let temperature_c = 21.0 + daylight(tick) * 7.0 + ((tick % 4) as f32 * 0.1);
    let humidity = 72.0 - daylight(tick) * 20.0;

    vec![
        (InputKind::Climate, RawReading::new("off")),
        (InputKind::Timer, RawReading::new("idle")),
        (InputKind::Inverter, RawReading::new("online")),
        (
            InputKind::Generation,
            RawReading::with_unit(format!("{generation_kw:.2}"), "kW"),
        ),
        (
            InputKind::Grid,
            RawReading::with_unit(format!("{grid_w:.0}"), "W"),
        ),
        (
            InputKind::Temperature,
            RawReading::with_unit(format!("{temperature_c:.1}"), "°C"),
        ),
        (
            InputKind::Humidity,
            RawReading::with_unit(format!("{humidity:.1}"), "%"),
        ),
    ]
}

/// 0 at night, rising to 1 at midday.
fn daylight(tick: u64) -> f32 {
    let phase = (tick % DAY_TICKS) as f32 / DAY_TICKS as f32;
    (phase * std::f32::consts::TAU - std::f32::consts::FRAC_PI_2)
        .sin()
        .max(0.0)
}
