use serde::{Deserialize, Serialize};

use crate::types::ControlMode;

/// Thresholds and delays for one evaluation. Delays are counted in ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleParameters {
    pub generation_cool_threshold: f32,
    pub generation_dry_threshold: f32,
    pub temperature_threshold: f32,
    pub temperature_cool: f32,
    pub humidity_threshold: f32,
    pub grid_usage_delay: u32,
    pub reactivate_delay: u32,
}

impl Default for RuleParameters {
    fn default() -> Self {
        Self {
            generation_cool_threshold: 5_500.0,
            generation_dry_threshold: 3_500.0,
            temperature_threshold: 24.0,
            temperature_cool: 22.0,
            humidity_threshold: 65.0,
            grid_usage_delay: 2,
            reactivate_delay: 2,
        }
    }
}

impl RuleParameters {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.generation_cool_threshold =
            finite_non_negative(self.generation_cool_threshold, defaults.generation_cool_threshold);
        self.generation_dry_threshold =
            finite_non_negative(self.generation_dry_threshold, defaults.generation_dry_threshold);
        self.humidity_threshold = finite_or(self.humidity_threshold, defaults.humidity_threshold)
            .clamp(0.0, 100.0);
        self.temperature_threshold =
            finite_or(self.temperature_threshold, defaults.temperature_threshold);
        self.temperature_cool = finite_or(self.temperature_cool, defaults.temperature_cool);
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn finite_non_negative(value: f32, fallback: f32) -> f32 {
    finite_or(value, fallback).max(0.0)
}

/// User-facing control flags, persisted alongside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlState {
    pub enabled: bool,
    pub cooling_enabled: bool,
    pub aggressive_cooling: bool,
    pub dry_run: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        // Start in dry-run until someone explicitly switches to live.
        Self {
            enabled: true,
            cooling_enabled: true,
            aggressive_cooling: false,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    Enabled,
    CoolingEnabled,
    AggressiveCooling,
    DryRun,
}

impl ControlKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enabled" => Some(Self::Enabled),
            "cooling_enabled" => Some(Self::CoolingEnabled),
            "aggressive_cooling" => Some(Self::AggressiveCooling),
            "dry_run" => Some(Self::DryRun),
            _ => None,
        }
    }
}

impl ControlState {
    pub fn mode(&self) -> ControlMode {
        if !self.enabled {
            ControlMode::Disabled
        } else if self.dry_run {
            ControlMode::DryRun
        } else if self.aggressive_cooling {
            ControlMode::Aggressive
        } else {
            ControlMode::Live
        }
    }

    pub fn set_mode(&mut self, mode: ControlMode) -> bool {
        let before = *self;
        self.enabled = mode != ControlMode::Disabled;
        self.dry_run = mode == ControlMode::DryRun;
        self.aggressive_cooling = mode == ControlMode::Aggressive;
        before != *self
    }

    pub fn set(&mut self, key: ControlKey, value: bool) -> bool {
        let slot = match key {
            ControlKey::Enabled => &mut self.enabled,
            ControlKey::CoolingEnabled => &mut self.cooling_enabled,
            ControlKey::AggressiveCooling => &mut self.aggressive_cooling,
            ControlKey::DryRun => &mut self.dry_run,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    /// Applies `MQTT_HOST`, `MQTT_PORT`, `MQTT_USER` and `MQTT_PASS` from the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            self.mqtt_port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt_user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt_pass = pass;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub parameters: RuleParameters,
    pub eval_interval_secs: u64,
    pub network: NetworkConfig,
    /// When false, solar is assumed online and no inverter reading is expected.
    pub inverter_configured: bool,
    pub notification_topic: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parameters: RuleParameters::default(),
            eval_interval_secs: 300,
            network: NetworkConfig::default(),
            inverter_configured: false,
            notification_topic: None,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.parameters.sanitize();
        self.eval_interval_secs = self.eval_interval_secs.clamp(10, 3_600);
        if self
            .notification_topic
            .as_deref()
            .is_some_and(|topic| topic.trim().is_empty())
        {
            self.notification_topic = None;
        }
    }
}
