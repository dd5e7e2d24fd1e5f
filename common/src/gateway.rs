use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{ControlState, RuleParameters},
    rules::HomeInput,
    types::AirconMode,
};

/// A reading as reported by the host platform, before unit normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finishes_at: Option<DateTime<Utc>>,
    /// Remaining time of a paused timer, `H:MM:SS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<String>,
}

impl RawReading {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            unit: None,
            finishes_at: None,
            remaining: None,
        }
    }

    pub fn with_unit(state: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            unit: Some(unit.into()),
            ..Self::new(state)
        }
    }

    /// Accepts either a JSON object or a bare state string.
    pub fn from_payload(payload: &str) -> Self {
        let trimmed = payload.trim();
        if trimmed.starts_with('{') {
            if let Ok(reading) = serde_json::from_str::<RawReading>(trimmed) {
                return reading;
            }
        }
        Self::new(trimmed)
    }

    fn is_unavailable(&self) -> bool {
        matches!(
            self.state.trim().to_ascii_lowercase().as_str(),
            "unknown" | "unavailable"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Climate,
    Timer,
    Inverter,
    Generation,
    Grid,
    Temperature,
    Humidity,
}

impl InputKind {
    pub const ALL: [InputKind; 7] = [
        Self::Climate,
        Self::Timer,
        Self::Inverter,
        Self::Generation,
        Self::Grid,
        Self::Temperature,
        Self::Humidity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Climate => "climate",
            Self::Timer => "timer",
            Self::Inverter => "inverter",
            Self::Generation => "generation",
            Self::Grid => "grid",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("missing {0} reading")]
    Missing(InputKind),
    #[error("{0} reading unavailable")]
    Unavailable(InputKind),
    #[error("invalid numeric {kind}: {value}")]
    InvalidNumber { kind: InputKind, value: String },
    #[error("unsupported {kind} unit: {unit}")]
    InvalidUnit { kind: InputKind, unit: String },
}

/// Latest raw reading per input, as last received.
#[derive(Debug, Clone, Default)]
pub struct ReadingSet {
    readings: [Option<RawReading>; 7],
}

impl ReadingSet {
    pub fn update(&mut self, kind: InputKind, reading: RawReading) {
        self.readings[Self::slot(kind)] = Some(reading);
    }

    pub fn get(&self, kind: InputKind) -> Option<&RawReading> {
        self.readings[Self::slot(kind)].as_ref()
    }

    fn slot(kind: InputKind) -> usize {
        match kind {
            InputKind::Climate => 0,
            InputKind::Timer => 1,
            InputKind::Inverter => 2,
            InputKind::Generation => 3,
            InputKind::Grid => 4,
            InputKind::Temperature => 5,
            InputKind::Humidity => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub home: HomeInput,
    pub timer_finishes_at: Option<DateTime<Utc>>,
}

/// Turns raw readings into a normalized [`HomeInput`].
#[derive(Debug, Clone, Copy)]
pub struct InputGateway<'a> {
    pub params: &'a RuleParameters,
    pub inverter_configured: bool,
}

impl InputGateway<'_> {
    pub fn snapshot(
        &self,
        readings: &ReadingSet,
        controls: &ControlState,
        auto: bool,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, InputError> {
        let climate = required(readings, InputKind::Climate)?;
        let timer = required(readings, InputKind::Timer)?;

        let have_solar = if self.inverter_configured {
            let inverter = present(readings, InputKind::Inverter)?;
            !inverter.is_unavailable() && state_to_bool(&inverter.state)
        } else {
            true
        };

        let generation_reading = present(readings, InputKind::Generation)?;
        let grid_reading = present(readings, InputKind::Grid)?;
        let (generation, grid_usage) = if have_solar {
            (
                normalized_power(generation_reading, InputKind::Generation)?,
                normalized_power(grid_reading, InputKind::Grid)?,
            )
        } else {
            (0.0, 0.0)
        };

        let temperature_reading = present(readings, InputKind::Temperature)?;
        let temperature = if temperature_reading.is_unavailable() {
            self.params.temperature_threshold - 0.1
        } else {
            normalized_temperature(temperature_reading)?
        };

        let humidity_reading = present(readings, InputKind::Humidity)?;
        let humidity = if humidity_reading.is_unavailable() {
            self.params.humidity_threshold + 1.0
        } else {
            parse_number(humidity_reading, InputKind::Humidity)?
        };

        let timer_state = timer.state.trim().to_ascii_lowercase();
        let timer_active = !matches!(timer_state.as_str(), "idle" | "cancelled");

        Ok(Snapshot {
            home: HomeInput {
                aircon_mode: AirconMode::parse(&climate.state),
                have_solar,
                generation,
                grid_usage,
                timer: timer_active,
                temperature,
                humidity,
                auto,
                aggressive_cooling: controls.aggressive_cooling,
                enabled: controls.enabled,
                cooling_enabled: controls.cooling_enabled,
            },
            timer_finishes_at: if timer_active {
                timer_finishes_at(timer, now)
            } else {
                None
            },
        })
    }
}

fn present(readings: &ReadingSet, kind: InputKind) -> Result<&RawReading, InputError> {
    readings.get(kind).ok_or(InputError::Missing(kind))
}

fn required(readings: &ReadingSet, kind: InputKind) -> Result<&RawReading, InputError> {
    let reading = present(readings, kind)?;
    if reading.is_unavailable() {
        return Err(InputError::Unavailable(kind));
    }
    Ok(reading)
}

fn state_to_bool(state: &str) -> bool {
    let value: String = state
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .collect();
    matches!(value.as_str(), "on" | "true" | "1" | "online")
}

fn parse_number(reading: &RawReading, kind: InputKind) -> Result<f32, InputError> {
    reading
        .state
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| InputError::InvalidNumber {
            kind,
            value: reading.state.clone(),
        })
}

/// Unit conversion can overflow a value that parsed as finite.
fn finite(value: f32, reading: &RawReading, kind: InputKind) -> Result<f32, InputError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(InputError::InvalidNumber {
            kind,
            value: reading.state.clone(),
        })
    }
}

fn unit_of(reading: &RawReading) -> &str {
    reading.unit.as_deref().map(str::trim).unwrap_or("")
}

fn normalized_power(reading: &RawReading, kind: InputKind) -> Result<f32, InputError> {
    if reading.is_unavailable() {
        return Ok(0.0);
    }

    let value = parse_number(reading, kind)?;
    let unit = unit_of(reading).to_ascii_lowercase();
    let scale = match unit.as_str() {
        "" | "w" | "watt" | "watts" => Some(1.0),
        "kw" | "kilowatt" | "kilowatts" => Some(1_000.0),
        "mw" => Some(1_000_000.0),
        _ => None,
    };
    let Some(scale) = scale else {
        return Err(InputError::InvalidUnit { kind, unit });
    };
    finite(value * scale, reading, kind).map(|watts| watts.max(0.0))
}

fn normalized_temperature(reading: &RawReading) -> Result<f32, InputError> {
    let value = parse_number(reading, InputKind::Temperature)?;
    match unit_of(reading) {
        "" | "°C" | "C" | "°c" | "c" => Ok(value),
        "°F" | "F" | "°f" | "f" => finite(
            (value - 32.0) * 5.0 / 9.0,
            reading,
            InputKind::Temperature,
        ),
        unit => Err(InputError::InvalidUnit {
            kind: InputKind::Temperature,
            unit: unit.to_string(),
        }),
    }
}

fn timer_finishes_at(timer: &RawReading, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(finishes_at) = timer.finishes_at {
        return Some(finishes_at);
    }

    // Paused timers only report what is left.
    let remaining = timer.remaining.as_deref()?.trim();
    let mut parts = remaining.split(':').map(|part| part.parse::<i64>().ok());
    let (Some(Some(hours)), Some(Some(minutes)), Some(Some(seconds)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let remaining = Duration::try_hours(hours)?
        .checked_add(&Duration::try_minutes(minutes)?)?
        .checked_add(&Duration::try_seconds(seconds)?)?;
    now.checked_add_signed(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn readings() -> ReadingSet {
        let mut readings = ReadingSet::default();
        readings.update(InputKind::Climate, RawReading::new("off"));
        readings.update(InputKind::Timer, RawReading::new("idle"));
        readings.update(InputKind::Generation, RawReading::with_unit("6000", "W"));
        readings.update(InputKind::Grid, RawReading::with_unit("0", "W"));
        readings.update(InputKind::Temperature, RawReading::with_unit("25", "°C"));
        readings.update(InputKind::Humidity, RawReading::with_unit("40", "%"));
        readings
    }

    fn snapshot(readings: &ReadingSet, inverter_configured: bool) -> Result<Snapshot, InputError> {
        let params = RuleParameters::default();
        let gateway = InputGateway {
            params: &params,
            inverter_configured,
        };
        gateway.snapshot(readings, &ControlState::default(), false, now())
    }

    #[test]
    fn builds_snapshot_from_plain_readings() {
        let snapshot = snapshot(&readings(), false).unwrap();

        assert_eq!(snapshot.home.aircon_mode, AirconMode::Off);
        assert!(snapshot.home.have_solar);
        assert_eq!(snapshot.home.generation, 6_000.0);
        assert_eq!(snapshot.home.temperature, 25.0);
        assert_eq!(snapshot.home.humidity, 40.0);
        assert!(!snapshot.home.timer);
        assert!(snapshot.home.enabled);
        assert_eq!(snapshot.timer_finishes_at, None);
    }

    #[test]
    fn kilowatts_are_normalized_to_watts() {
        let mut readings = readings();
        readings.update(InputKind::Generation, RawReading::with_unit("6", "kW"));
        readings.update(InputKind::Grid, RawReading::with_unit("-0.2", "kW"));

        let home = snapshot(&readings, false).unwrap().home;
        assert_eq!(home.generation, 6_000.0);
        assert_eq!(home.grid_usage, 0.0);
    }

    #[test]
    fn fahrenheit_is_normalized_to_celsius() {
        let mut readings = readings();
        readings.update(InputKind::Temperature, RawReading::with_unit("77", "°F"));

        let home = snapshot(&readings, false).unwrap().home;
        assert!((home.temperature - 25.0).abs() < 0.01);
    }

    #[test]
    fn unavailable_readings_use_safe_defaults() {
        let mut readings = readings();
        readings.update(InputKind::Generation, RawReading::with_unit("unavailable", "W"));
        readings.update(InputKind::Grid, RawReading::new("unknown"));
        readings.update(InputKind::Temperature, RawReading::new("unknown"));
        readings.update(InputKind::Humidity, RawReading::new("unavailable"));

        let params = RuleParameters::default();
        let home = snapshot(&readings, false).unwrap().home;
        assert_eq!(home.generation, 0.0);
        assert_eq!(home.grid_usage, 0.0);
        assert!(home.temperature < params.temperature_threshold);
        assert!(home.humidity > params.humidity_threshold);
    }

    #[test]
    fn offline_inverter_zeroes_power() {
        let mut readings = readings();
        readings.update(InputKind::Inverter, RawReading::new("off-line"));
        readings.update(InputKind::Grid, RawReading::with_unit("bogus", "W"));

        let home = snapshot(&readings, true).unwrap().home;
        assert!(!home.have_solar);
        assert_eq!(home.generation, 0.0);
        assert_eq!(home.grid_usage, 0.0);

        readings.update(InputKind::Inverter, RawReading::new("On-Line"));
        readings.update(InputKind::Grid, RawReading::with_unit("0", "W"));
        assert!(snapshot(&readings, true).unwrap().home.have_solar);

        readings.update(InputKind::Inverter, RawReading::new("unavailable"));
        assert!(!snapshot(&readings, true).unwrap().home.have_solar);
    }

    #[test]
    fn missing_and_unavailable_required_readings_fail() {
        assert_eq!(
            snapshot(&ReadingSet::default(), false),
            Err(InputError::Missing(InputKind::Climate))
        );
        assert_eq!(
            snapshot(&readings(), true),
            Err(InputError::Missing(InputKind::Inverter))
        );

        let mut readings = readings();
        readings.update(InputKind::Climate, RawReading::new("unavailable"));
        assert_eq!(
            snapshot(&readings, false),
            Err(InputError::Unavailable(InputKind::Climate))
        );
    }

    #[test]
    fn unparseable_climate_is_unknown_mode() {
        let mut readings = readings();
        readings.update(InputKind::Climate, RawReading::new("defrosting"));
        assert_eq!(
            snapshot(&readings, false).unwrap().home.aircon_mode,
            AirconMode::Unknown
        );
    }

    #[test]
    fn rejects_bad_units_and_numbers() {
        let mut readings = readings();
        readings.update(InputKind::Generation, RawReading::with_unit("5", "hp"));
        assert_eq!(
            snapshot(&readings, false),
            Err(InputError::InvalidUnit {
                kind: InputKind::Generation,
                unit: "hp".to_string(),
            })
        );

        let mut readings = self::readings();
        readings.update(InputKind::Temperature, RawReading::with_unit("25", "K"));
        assert!(matches!(
            snapshot(&readings, false),
            Err(InputError::InvalidUnit { kind: InputKind::Temperature, .. })
        ));

        let mut readings = self::readings();
        readings.update(InputKind::Humidity, RawReading::new("humid"));
        assert!(matches!(
            snapshot(&readings, false),
            Err(InputError::InvalidNumber { kind: InputKind::Humidity, .. })
        ));
    }

    #[test]
    fn paused_timer_finish_time_uses_remaining() {
        let mut readings = readings();
        readings.update(
            InputKind::Timer,
            RawReading {
                remaining: Some("0:04:59".to_string()),
                ..RawReading::new("paused")
            },
        );

        let snapshot = snapshot(&readings, false).unwrap();
        assert!(snapshot.home.timer);
        assert_eq!(
            snapshot.timer_finishes_at,
            Some(now() + Duration::minutes(4) + Duration::seconds(59))
        );
    }

    #[test]
    fn active_timer_prefers_finishes_at() {
        let finishes_at = now() + Duration::minutes(30);
        let mut readings = readings();
        readings.update(
            InputKind::Timer,
            RawReading {
                finishes_at: Some(finishes_at),
                remaining: Some("0:01:00".to_string()),
                ..RawReading::new("active")
            },
        );

        assert_eq!(
            snapshot(&readings, false).unwrap().timer_finishes_at,
            Some(finishes_at)
        );
    }

    #[test]
    fn oversized_remaining_has_no_finish_time() {
        for remaining in ["9999999999999:00:00", "0:9223372036854775807:00"] {
            let mut readings = readings();
            readings.update(
                InputKind::Timer,
                RawReading {
                    remaining: Some(remaining.to_string()),
                    ..RawReading::new("paused")
                },
            );

            let snapshot = snapshot(&readings, false).unwrap();
            assert!(snapshot.home.timer);
            assert_eq!(snapshot.timer_finishes_at, None, "{remaining}");
        }
    }

    #[test]
    fn scaled_power_overflow_is_rejected() {
        let mut readings = readings();
        readings.update(InputKind::Generation, RawReading::with_unit("1e35", "MW"));
        assert_eq!(
            snapshot(&readings, false),
            Err(InputError::InvalidNumber {
                kind: InputKind::Generation,
                value: "1e35".to_string(),
            })
        );

        let mut readings = self::readings();
        readings.update(InputKind::Temperature, RawReading::with_unit("3e38", "°F"));
        assert!(matches!(
            snapshot(&readings, false),
            Err(InputError::InvalidNumber { kind: InputKind::Temperature, .. })
        ));
    }

    #[test]
    fn payload_accepts_json_or_bare_state() {
        assert_eq!(
            RawReading::from_payload(r#"{"state":"6","unit":"kW"}"#),
            RawReading::with_unit("6", "kW")
        );
        assert_eq!(RawReading::from_payload(" cool \n"), RawReading::new("cool"));
        assert_eq!(RawReading::from_payload("{broken"), RawReading::new("{broken"));
    }
}
