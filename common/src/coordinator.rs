//! Per-appliance evaluation pipeline around the rule engine.
//!
//! A tick is split in two so the host can actuate in between:
//! [`Coordinator::plan`] builds the snapshot and decides, the host sends
//! the returned commands, then [`Coordinator::commit`] reconciles session
//! memory and produces the record. Both run under the host's lock.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{ControlKey, ControlState, RuleParameters, RuntimeConfig},
    gateway::{InputError, InputGateway, InputKind, RawReading, ReadingSet, Snapshot},
    rules::{self, CachedState, Decision},
    store::{StoredSession, StoredState, MAX_RECENT_EVALUATIONS, STORAGE_VERSION},
    types::{AirconMode, ApplianceCommand, ControlMode, ControllerStatus, HomeOutput},
};

const NOTIFICATION_TITLE: &str = "Home Rules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Poll,
    Manual,
    Control,
    ControlMode,
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("failed to apply adjustment {action} after {attempts} attempts")]
    FailedToChange { action: HomeOutput, attempts: u32 },
}

/// One line of evaluation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub time: DateTime<Utc>,
    pub trigger: Trigger,
    pub current: HomeOutput,
    pub adjustment: HomeOutput,
    pub mode: HomeOutput,
    pub reason: String,
    pub generation: f32,
    pub grid_usage: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub have_solar: bool,
    pub auto: bool,
    pub dry_run: bool,
    pub tolerated: u32,
    pub reactivate_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: &'static str,
    pub message: String,
}

/// A decided but not yet committed tick.
#[derive(Debug, Clone)]
pub struct Plan {
    pub commands: Vec<ApplianceCommand>,
    trigger: Trigger,
    time: DateTime<Utc>,
    snapshot: Snapshot,
    current: HomeOutput,
    decision: Decision,
}

impl Plan {
    pub fn adjustment(&self) -> HomeOutput {
        self.decision.action
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub record: EvaluationRecord,
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub parameters: RuleParameters,
    pub controls: ControlState,
    pub control_mode: &'static str,
    pub auto_mode: bool,
    pub session: CachedState,
    pub last_changed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub recent_evaluations: Vec<EvaluationRecord>,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    readings: ReadingSet,
    session: CachedState,
    controls: ControlState,
    auto_mode: bool,
    initialized: bool,
    last_changed: Option<DateTime<Utc>>,
    last_error: Option<String>,
    recent: VecDeque<EvaluationRecord>,
    status: Option<ControllerStatus>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::from_stored(StoredState::default())
    }
}

impl Coordinator {
    pub fn from_stored(stored: StoredState) -> Self {
        let mut recent: VecDeque<EvaluationRecord> = stored.recent_evaluations.into();
        recent.truncate(MAX_RECENT_EVALUATIONS);
        Self {
            readings: ReadingSet::default(),
            session: stored.session.to_cached(),
            controls: stored.controls,
            auto_mode: stored.auto_mode,
            initialized: false,
            last_changed: stored.last_changed,
            last_error: None,
            recent,
            status: None,
        }
    }

    pub fn to_stored(&self) -> StoredState {
        StoredState {
            version: STORAGE_VERSION,
            controls: self.controls,
            session: StoredSession::from(&self.session),
            auto_mode: self.auto_mode,
            last_changed: self.last_changed,
            recent_evaluations: self.recent.iter().cloned().collect(),
        }
    }

    pub fn controls(&self) -> &ControlState {
        &self.controls
    }

    pub fn session(&self) -> &CachedState {
        &self.session
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn record_reading(&mut self, kind: InputKind, reading: RawReading) {
        debug!(input = kind.as_str(), state = %reading.state, "reading received");
        self.readings.update(kind, reading);
    }

    pub fn set_mode(&mut self, mode: ControlMode) -> bool {
        let changed = self.controls.set_mode(mode);
        if changed {
            info!(mode = mode.as_str(), "control mode changed");
        }
        changed
    }

    pub fn set_control(&mut self, key: ControlKey, value: bool) -> bool {
        let changed = self.controls.set(key, value);
        if changed {
            info!(?key, value, "control changed");
        }
        changed
    }

    /// Builds the snapshot, syncs session memory and decides the action.
    pub fn plan(
        &mut self,
        runtime: &RuntimeConfig,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<Plan, EvaluationError> {
        let gateway = InputGateway {
            params: &runtime.parameters,
            inverter_configured: runtime.inverter_configured,
        };
        let snapshot = match gateway.snapshot(&self.readings, &self.controls, self.auto_mode, now) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, ?trigger, "skipping evaluation");
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };

        let current = rules::current_state(&snapshot.home);
        if !self.initialized {
            self.initialized = true;
            self.sync_on_startup(current, snapshot.home.timer);
        } else if self.session.last.is_none() {
            self.session.last = Some(current);
        }

        let decision = rules::adjust(&runtime.parameters, &snapshot.home, &mut self.session);
        debug!(
            ?trigger,
            %current,
            action = %decision.action,
            reason = decision.reason,
            "decided"
        );

        let commands = commands_for(decision.action, runtime.parameters.temperature_cool);
        let commands = if self.controls.dry_run {
            if !commands.is_empty() {
                info!(action = %decision.action, "dry run: would apply adjustment");
            }
            Vec::new()
        } else {
            commands
        };

        Ok(Plan {
            commands,
            trigger,
            time: now,
            snapshot,
            current,
            decision,
        })
    }

    /// Records the outcome of an actuated plan.
    pub fn commit(&mut self, plan: Plan) -> Result<Evaluation, EvaluationError> {
        let Plan {
            trigger,
            time,
            snapshot,
            current,
            decision,
            ..
        } = plan;
        let adjustment = decision.action;
        let dry_run = self.controls.dry_run;

        match adjustment {
            HomeOutput::Cool | HomeOutput::Dry => self.auto_mode = true,
            HomeOutput::Off => self.auto_mode = false,
            _ => {}
        }

        let previous = self.session.last;
        let mut applied = rules::apply_adjustment(&mut self.session, current, adjustment);
        if dry_run {
            self.session.failed_to_change = 0;
            applied = true;
        }
        if !applied {
            let err = EvaluationError::FailedToChange {
                action: adjustment,
                attempts: self.session.failed_to_change,
            };
            warn!(error = %err, "appliance is not following adjustments");
            self.last_error = Some(err.to_string());
            return Err(err);
        }

        let mode = self.session.last.unwrap_or(current);
        let notification = match previous {
            Some(previous) if previous != mode => {
                self.last_changed = Some(time);
                info!(from = %previous, to = %mode, "mode changed");
                Some(Notification {
                    title: NOTIFICATION_TITLE,
                    message: format!(
                        "Mode changed: {previous} -> {mode} (current={current}, action={adjustment}, dry_run={dry_run})"
                    ),
                })
            }
            _ => None,
        };

        let home = &snapshot.home;
        let record = EvaluationRecord {
            time,
            trigger,
            current,
            adjustment,
            mode,
            reason: decision.reason.to_string(),
            generation: home.generation,
            grid_usage: home.grid_usage,
            temperature: home.temperature,
            humidity: home.humidity,
            have_solar: home.have_solar,
            auto: home.auto,
            dry_run,
            tolerated: self.session.tolerated,
            reactivate_delay: self.session.reactivate_delay,
        };
        self.recent.push_front(record.clone());
        self.recent.truncate(MAX_RECENT_EVALUATIONS);

        self.last_error = None;
        self.status = Some(ControllerStatus {
            mode,
            current,
            adjustment,
            decision: format!("{mode} - {}", decision.reason),
            reason: decision.reason.to_string(),
            control_mode: self.controls.mode().as_str(),
            solar_available: home.have_solar && home.generation > 0.0,
            solar_online: home.have_solar,
            solar_generation_w: home.generation,
            grid_usage_w: home.grid_usage,
            temperature_c: home.temperature,
            humidity_percent: home.humidity,
            tolerated: self.session.tolerated,
            reactivate_delay: self.session.reactivate_delay,
            auto_mode: self.auto_mode,
            dry_run,
            timer_finishes_at: snapshot.timer_finishes_at,
            last_evaluated: Some(time),
            last_changed: self.last_changed,
            last_error: None,
        });

        Ok(Evaluation {
            record,
            notification,
        })
    }

    pub fn status(&self) -> ControllerStatus {
        let mut status = self.status.clone().unwrap_or_else(|| {
            let mode = self.session.last.unwrap_or(HomeOutput::Off);
            ControllerStatus {
                mode,
                current: HomeOutput::Off,
                adjustment: HomeOutput::NoChange,
                decision: String::new(),
                reason: String::new(),
                control_mode: "",
                solar_available: false,
                solar_online: false,
                solar_generation_w: 0.0,
                grid_usage_w: 0.0,
                temperature_c: 0.0,
                humidity_percent: 0.0,
                tolerated: self.session.tolerated,
                reactivate_delay: self.session.reactivate_delay,
                auto_mode: self.auto_mode,
                dry_run: self.controls.dry_run,
                timer_finishes_at: None,
                last_evaluated: None,
                last_changed: self.last_changed,
                last_error: None,
            }
        });
        status.control_mode = self.controls.mode().as_str();
        status.dry_run = self.controls.dry_run;
        status.last_error = self.last_error.clone();
        status
    }

    pub fn diagnostics(&self, params: &RuleParameters) -> Diagnostics {
        Diagnostics {
            parameters: params.clone(),
            controls: self.controls,
            control_mode: self.controls.mode().as_str(),
            auto_mode: self.auto_mode,
            session: self.session.clone(),
            last_changed: self.last_changed,
            last_error: self.last_error.clone(),
            recent_evaluations: self.recent.iter().cloned().collect(),
        }
    }

    fn sync_on_startup(&mut self, current: HomeOutput, timer_running: bool) {
        match self.session.last {
            None => self.session.last = Some(current),
            // The timer keeps running across restarts.
            Some(HomeOutput::Timer) if timer_running => {}
            Some(last) if last != current => {
                info!(from = %last, to = %current, "startup sync: adopting live state");
                self.session.last = Some(current);
            }
            Some(_) => {}
        }
    }
}

fn commands_for(action: HomeOutput, temperature_cool: f32) -> Vec<ApplianceCommand> {
    match action {
        HomeOutput::Cool => vec![ApplianceCommand::SetHvacMode {
            mode: AirconMode::Cool,
            target_temperature: temperature_cool,
        }],
        HomeOutput::Dry => vec![ApplianceCommand::SetHvacMode {
            mode: AirconMode::Dry,
            target_temperature: temperature_cool,
        }],
        HomeOutput::Off => vec![ApplianceCommand::TurnOff],
        HomeOutput::Timer => vec![ApplianceCommand::StartTimer],
        HomeOutput::NoChange | HomeOutput::Reset | HomeOutput::Disabled => Vec::new(),
    }
}
