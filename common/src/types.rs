use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mode reported by the appliance itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirconMode {
    Dry,
    Cool,
    Heat,
    HeatCool,
    FanOnly,
    Auto,
    Off,
    Unknown,
}

impl AirconMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dry => "dry",
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::HeatCool => "heat_cool",
            Self::FanOnly => "fan_only",
            Self::Auto => "auto",
            Self::Off => "off",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a raw mode reading. Anything unrecognised becomes `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dry" => Self::Dry,
            "cool" => Self::Cool,
            "heat" => Self::Heat,
            "heat_cool" => Self::HeatCool,
            "fan_only" => Self::FanOnly,
            "auto" => Self::Auto,
            "off" => Self::Off,
            _ => Self::Unknown,
        }
    }
}

/// Decision output of the rule engine.
///
/// The same tag doubles as the canonical current state of the appliance.
/// Session memory compares a requested action against it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HomeOutput {
    NoChange,
    Off,
    Cool,
    Dry,
    Timer,
    Disabled,
    Reset,
}

impl HomeOutput {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoChange => "NoChange",
            Self::Off => "Off",
            Self::Cool => "Cool",
            Self::Dry => "Dry",
            Self::Timer => "Timer",
            Self::Disabled => "Disabled",
            Self::Reset => "Reset",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NoChange" => Some(Self::NoChange),
            "Off" => Some(Self::Off),
            "Cool" => Some(Self::Cool),
            "Dry" => Some(Self::Dry),
            "Timer" => Some(Self::Timer),
            "Disabled" => Some(Self::Disabled),
            "Reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

impl std::fmt::Display for HomeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing operational mode, a single selector over the control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Disabled,
    #[serde(rename = "Dry Run")]
    DryRun,
    Live,
    Aggressive,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::DryRun => "Dry Run",
            Self::Live => "Live",
            Self::Aggressive => "Aggressive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "disabled" => Some(Self::Disabled),
            "dryrun" => Some(Self::DryRun),
            "live" => Some(Self::Live),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ApplianceCommand {
    SetHvacMode {
        mode: AirconMode,
        #[serde(rename = "targetTemperature")]
        target_temperature: f32,
    },
    TurnOff,
    StartTimer,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: HomeOutput,
    pub current: HomeOutput,
    pub adjustment: HomeOutput,
    pub decision: String,
    pub reason: String,
    #[serde(rename = "controlMode")]
    pub control_mode: &'static str,
    #[serde(rename = "solarAvailable")]
    pub solar_available: bool,
    #[serde(rename = "solarOnline")]
    pub solar_online: bool,
    #[serde(rename = "solarGenerationW")]
    pub solar_generation_w: f32,
    #[serde(rename = "gridUsageW")]
    pub grid_usage_w: f32,
    #[serde(rename = "temperatureC")]
    pub temperature_c: f32,
    #[serde(rename = "humidityPercent")]
    pub humidity_percent: f32,
    pub tolerated: u32,
    #[serde(rename = "reactivateDelay")]
    pub reactivate_delay: u32,
    #[serde(rename = "autoMode")]
    pub auto_mode: bool,
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
    #[serde(rename = "timerFinishesAt")]
    pub timer_finishes_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastEvaluated")]
    pub last_evaluated: Option<DateTime<Utc>>,
    #[serde(rename = "lastChanged")]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_mode_is_unknown() {
        assert_eq!(AirconMode::parse(" Cool "), AirconMode::Cool);
        assert_eq!(AirconMode::parse("heat_cool"), AirconMode::HeatCool);
        assert_eq!(AirconMode::parse("unavailable"), AirconMode::Unknown);
        assert_eq!(AirconMode::parse(""), AirconMode::Unknown);
    }

    #[test]
    fn control_mode_accepts_loose_spellings() {
        assert_eq!(ControlMode::parse("Dry Run"), Some(ControlMode::DryRun));
        assert_eq!(ControlMode::parse("dry_run"), Some(ControlMode::DryRun));
        assert_eq!(ControlMode::parse("LIVE"), Some(ControlMode::Live));
        assert_eq!(ControlMode::parse("boost"), None);
    }

    #[test]
    fn commands_serialize_with_tag() {
        let json = serde_json::to_value(ApplianceCommand::SetHvacMode {
            mode: AirconMode::Dry,
            target_temperature: 22.0,
        })
        .unwrap();
        assert_eq!(json["command"], "set_hvac_mode");
        assert_eq!(json["mode"], "dry");
        assert_eq!(json["targetTemperature"], 22.0);
    }
}
