//! Pure decision engine.
//!
//! Everything here is synchronous and side-effect free apart from the
//! `CachedState` handed to [`adjust`] and [`apply_adjustment`]. Callers
//! serialize ticks per appliance.

use serde::{Deserialize, Serialize};

use crate::{
    config::RuleParameters,
    types::{AirconMode, HomeOutput},
};

/// Consecutive identical requests tolerated before the applier reports a fault.
pub const ALLOWED_FAILURES: u32 = 3;

const NO_SOLAR: &str = "No solar available";
const ABOVE_COOL: &str = "Solar above cool threshold";
const ALREADY_COOLING: &str = "Already cooling on solar";
const AGGRESSIVE_HOLD: &str = "Aggressive cooling hold";
const ABOVE_DRY: &str = "Solar above dry threshold";
const ALREADY_DRYING: &str = "Already drying on solar";
const INSUFFICIENT_SOLAR: &str = "Insufficient solar";

/// Normalized view of the world for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeInput {
    pub aircon_mode: AirconMode,
    pub have_solar: bool,
    /// Watts.
    pub generation: f32,
    /// Watts drawn from the grid.
    pub grid_usage: f32,
    /// A safety timer is currently running.
    pub timer: bool,
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
    /// The engine, not a human, is driving the appliance.
    pub auto: bool,
    pub aggressive_cooling: bool,
    pub enabled: bool,
    pub cooling_enabled: bool,
}

/// Session bookkeeping carried across ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedState {
    /// Remaining cooldown ticks after a forced shutoff.
    pub reactivate_delay: u32,
    /// Consecutive ticks of tolerated grid draw.
    pub tolerated: u32,
    /// Last canonical or decided state. Only [`apply_adjustment`] writes it.
    pub last: Option<HomeOutput>,
    pub failed_to_change: u32,
}

/// An action together with the branch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: HomeOutput,
    pub reason: &'static str,
}

impl Decision {
    fn new(action: HomeOutput, reason: &'static str) -> Self {
        Self { action, reason }
    }
}

/// Result of [`evaluate_turn_on`]: an optional activation target and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOn {
    pub action: Option<HomeOutput>,
    pub reason: &'static str,
}

impl TurnOn {
    fn new(action: Option<HomeOutput>, reason: &'static str) -> Self {
        Self { action, reason }
    }

    /// The reason, unless it only says that nothing can be activated.
    pub fn activation(&self) -> Option<&'static str> {
        match self.reason {
            INSUFFICIENT_SOLAR | AGGRESSIVE_HOLD => None,
            reason => Some(reason),
        }
    }
}

/// Decides whether solar conditions justify activating or switching the
/// appliance. Shared by the decision engine and the explainer.
pub fn evaluate_turn_on(params: &RuleParameters, home: &HomeInput) -> TurnOn {
    if !home.have_solar {
        return TurnOn::new(None, NO_SOLAR);
    }

    let aggressive = home.aggressive_cooling && home.grid_usage == 0.0;

    if home.generation >= params.generation_cool_threshold
        && (aggressive || home.humidity <= params.humidity_threshold)
    {
        if home.aircon_mode != AirconMode::Cool {
            return TurnOn::new(Some(HomeOutput::Cool), ABOVE_COOL);
        }
        if home.grid_usage == 0.0 {
            return TurnOn::new(None, ALREADY_COOLING);
        }
        // Still drawing from the grid: fall through to a possible downgrade.
    }

    if aggressive {
        return TurnOn::new(None, AGGRESSIVE_HOLD);
    }

    if home.generation >= params.generation_dry_threshold {
        if home.aircon_mode != AirconMode::Dry {
            return TurnOn::new(Some(HomeOutput::Dry), ABOVE_DRY);
        }
        if home.grid_usage == 0.0 {
            return TurnOn::new(None, ALREADY_DRYING);
        }
    }

    TurnOn::new(None, INSUFFICIENT_SOLAR)
}

/// Maps a snapshot to its canonical current state.
///
/// Heat, heat/cool, fan-only and auto are all bookkept as `Cool`.
pub fn current_state(home: &HomeInput) -> HomeOutput {
    if !home.enabled {
        return HomeOutput::Disabled;
    }

    if home.timer && home.aircon_mode != AirconMode::Off {
        return HomeOutput::Timer;
    }

    match home.aircon_mode {
        AirconMode::Cool => HomeOutput::Cool,
        AirconMode::Dry => HomeOutput::Dry,
        AirconMode::Off | AirconMode::Unknown => HomeOutput::Off,
        AirconMode::Heat | AirconMode::HeatCool | AirconMode::FanOnly | AirconMode::Auto => {
            HomeOutput::Cool
        }
    }
}

/// Computes the next action and mutates the session counters.
pub fn adjust(params: &RuleParameters, home: &HomeInput, session: &mut CachedState) -> Decision {
    evaluate(params, home, session)
}

/// Returns the reason [`adjust`] would give, leaving the session untouched.
pub fn explain(params: &RuleParameters, home: &HomeInput, session: &CachedState) -> &'static str {
    let mut scratch = session.clone();
    evaluate(params, home, &mut scratch).reason
}

/// Reconciles a decided action with session memory.
///
/// Returns `false` once the same action has been requested more than
/// [`ALLOWED_FAILURES`] times while memory already holds it.
pub fn apply_adjustment(session: &mut CachedState, current: HomeOutput, action: HomeOutput) -> bool {
    match action {
        HomeOutput::NoChange | HomeOutput::Reset => {
            if action == HomeOutput::Reset {
                session.last = Some(current);
            }
            session.failed_to_change = 0;
            true
        }
        _ if session.last != Some(action) => {
            session.last = Some(action);
            session.failed_to_change = 0;
            true
        }
        _ => {
            session.failed_to_change = session.failed_to_change.saturating_add(1);
            session.failed_to_change <= ALLOWED_FAILURES
        }
    }
}

fn evaluate(params: &RuleParameters, home: &HomeInput, session: &mut CachedState) -> Decision {
    if !home.enabled {
        session.tolerated = 0;
        let action = if session.last == Some(HomeOutput::Disabled) {
            HomeOutput::NoChange
        } else {
            HomeOutput::Disabled
        };
        return Decision::new(action, "Disabled");
    }

    if home.aircon_mode == AirconMode::Unknown {
        return Decision::new(HomeOutput::NoChange, "Unknown aircon mode");
    }

    if session.reactivate_delay > 0 {
        session.reactivate_delay -= 1;
        return Decision::new(HomeOutput::NoChange, "Waiting reactivate delay");
    }

    let turn_on = evaluate_turn_on(params, home);

    if home.aircon_mode == AirconMode::Off {
        session.tolerated = 0;
        return evaluate_off(params, home, session, turn_on);
    }

    if !home.have_solar || home.grid_usage > 0.0 {
        return evaluate_on_grid(params, home, session, turn_on);
    }

    if home.auto {
        session.tolerated = 0;
        if let Some(action) = turn_on.action {
            return Decision::new(action, turn_on.reason);
        }
        return Decision::new(
            HomeOutput::NoChange,
            turn_on.activation().unwrap_or("No change"),
        );
    }

    Decision::new(HomeOutput::NoChange, "No change")
}

fn evaluate_off(
    params: &RuleParameters,
    home: &HomeInput,
    session: &CachedState,
    turn_on: TurnOn,
) -> Decision {
    if home.cooling_enabled
        && home.aggressive_cooling
        && home.have_solar
        && home.generation > 0.0
        && home.temperature > params.temperature_cool
    {
        return Decision::new(HomeOutput::Cool, "Boost above cool setpoint");
    }

    if home.cooling_enabled && home.temperature >= params.temperature_threshold {
        if let Some(action) = turn_on.action {
            return Decision::new(action, turn_on.reason);
        }
    }

    let why = if !home.cooling_enabled {
        Some("Cooling disabled")
    } else if home.aggressive_cooling && home.temperature <= params.temperature_cool {
        Some("Temperature below cool setpoint")
    } else if home.temperature < params.temperature_threshold {
        Some("Temperature below threshold")
    } else {
        turn_on.activation()
    };

    if home.auto {
        return Decision::new(HomeOutput::Off, why.unwrap_or("Auto idle"));
    }

    if session.last == Some(HomeOutput::Timer) && !home.timer {
        return Decision::new(HomeOutput::Reset, "Timer expired");
    }

    Decision::new(HomeOutput::NoChange, why.unwrap_or("No change"))
}

fn evaluate_on_grid(
    params: &RuleParameters,
    home: &HomeInput,
    session: &mut CachedState,
    turn_on: TurnOn,
) -> Decision {
    if !home.auto {
        if !home.timer {
            return Decision::new(HomeOutput::Timer, "Manual");
        }
        return Decision::new(HomeOutput::NoChange, "No change");
    }

    if let Some(action) = turn_on.action {
        session.tolerated = 0;
        return Decision::new(action, turn_on.reason);
    }

    session.tolerated = session.tolerated.saturating_add(1);
    if session.tolerated < params.grid_usage_delay {
        return Decision::new(HomeOutput::NoChange, "Grid usage tolerated");
    }

    session.tolerated = 0;
    session.reactivate_delay = params.reactivate_delay;
    Decision::new(HomeOutput::Off, "Grid usage too high")
}
