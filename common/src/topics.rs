use crate::{gateway::InputKind, types::ApplianceCommand};

pub const TOPIC_INPUT_CLIMATE: &str = "home_rules/input/climate";
pub const TOPIC_INPUT_TIMER: &str = "home_rules/input/timer";
pub const TOPIC_INPUT_INVERTER: &str = "home_rules/input/inverter";
pub const TOPIC_INPUT_GENERATION: &str = "home_rules/input/generation";
pub const TOPIC_INPUT_GRID: &str = "home_rules/input/grid";
pub const TOPIC_INPUT_TEMPERATURE: &str = "home_rules/input/temperature";
pub const TOPIC_INPUT_HUMIDITY: &str = "home_rules/input/humidity";
pub const TOPIC_SENSOR_STATUS: &str = "home_rules/sensor/status";

pub const TOPIC_CONTROLLER_STATE: &str = "home_rules/controller/state";
pub const TOPIC_CONTROLLER_EVALUATION: &str = "home_rules/controller/evaluation";

pub const TOPIC_CMD_CLIMATE: &str = "home_rules/cmnd/climate";
pub const TOPIC_CMD_TIMER: &str = "home_rules/cmnd/timer";
pub const TOPIC_CMD_MODE: &str = "home_rules/cmnd/mode";
pub const TOPIC_CMD_EVALUATE: &str = "home_rules/cmnd/evaluate";
/// Followed by a control key, e.g. `home_rules/cmnd/control/dry_run`.
pub const TOPIC_CMD_CONTROL_PREFIX: &str = "home_rules/cmnd/control/";
pub const TOPIC_CMD_CONTROL_FILTER: &str = "home_rules/cmnd/control/+";

pub fn input_topic(kind: InputKind) -> &'static str {
    match kind {
        InputKind::Climate => TOPIC_INPUT_CLIMATE,
        InputKind::Timer => TOPIC_INPUT_TIMER,
        InputKind::Inverter => TOPIC_INPUT_INVERTER,
        InputKind::Generation => TOPIC_INPUT_GENERATION,
        InputKind::Grid => TOPIC_INPUT_GRID,
        InputKind::Temperature => TOPIC_INPUT_TEMPERATURE,
        InputKind::Humidity => TOPIC_INPUT_HUMIDITY,
    }
}

pub fn input_kind(topic: &str) -> Option<InputKind> {
    InputKind::ALL
        .into_iter()
        .find(|kind| input_topic(*kind) == topic)
}

pub fn command_topic(command: &ApplianceCommand) -> &'static str {
    match command {
        ApplianceCommand::StartTimer => TOPIC_CMD_TIMER,
        ApplianceCommand::SetHvacMode { .. } | ApplianceCommand::TurnOff => TOPIC_CMD_CLIMATE,
    }
}
