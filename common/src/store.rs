use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    config::ControlState,
    coordinator::EvaluationRecord,
    rules::CachedState,
    types::HomeOutput,
};

pub const STORAGE_VERSION: u32 = 1;
pub const MAX_RECENT_EVALUATIONS: usize = 50;

/// Everything the controller persists between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredState {
    pub version: u32,
    pub controls: ControlState,
    pub session: StoredSession,
    pub auto_mode: bool,
    pub last_changed: Option<DateTime<Utc>>,
    pub recent_evaluations: Vec<EvaluationRecord>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            version: STORAGE_VERSION,
            controls: ControlState::default(),
            session: StoredSession::default(),
            auto_mode: false,
            last_changed: None,
            recent_evaluations: Vec::new(),
        }
    }
}

impl StoredState {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut state: StoredState = serde_json::from_str(raw)?;
        state.recent_evaluations.truncate(MAX_RECENT_EVALUATIONS);
        state.version = STORAGE_VERSION;
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Session counters as stored on disk. `last` stays a free-form tag so
/// older spellings can still be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSession {
    pub reactivate_delay: u32,
    pub tolerated: u32,
    pub last: Option<String>,
    pub failed_to_change: u32,
}

impl From<&CachedState> for StoredSession {
    fn from(session: &CachedState) -> Self {
        Self {
            reactivate_delay: session.reactivate_delay,
            tolerated: session.tolerated,
            last: session.last.map(|last| last.as_str().to_string()),
            failed_to_change: session.failed_to_change,
        }
    }
}

impl StoredSession {
    pub fn to_cached(&self) -> CachedState {
        CachedState {
            reactivate_delay: self.reactivate_delay,
            tolerated: self.tolerated,
            last: self.last.as_deref().and_then(parse_last),
            failed_to_change: self.failed_to_change,
        }
    }
}

fn parse_last(tag: &str) -> Option<HomeOutput> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }
    if let Some(output) = HomeOutput::from_tag(tag) {
        return Some(output);
    }

    let folded: String = tag
        .chars()
        .filter(|c| !matches!(c, ' ' | '_'))
        .collect::<String>()
        .to_ascii_lowercase();
    let output = match folded.as_str() {
        "nochange" | "none" => Some(HomeOutput::NoChange),
        "off" => Some(HomeOutput::Off),
        "cool" => Some(HomeOutput::Cool),
        "dry" => Some(HomeOutput::Dry),
        "timer" => Some(HomeOutput::Timer),
        "disabled" => Some(HomeOutput::Disabled),
        "reset" => Some(HomeOutput::Reset),
        _ => None,
    };
    if output.is_none() {
        warn!(tag, "dropping unrecognised stored session state");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session_with_last(last: &str) -> StoredSession {
        StoredSession {
            last: Some(last.to_string()),
            ..StoredSession::default()
        }
    }

    #[test]
    fn legacy_no_change_spellings_migrate() {
        for legacy in ["no_change", "No change", "No Change", "none", "NONE", "NoChange"] {
            assert_eq!(
                session_with_last(legacy).to_cached().last,
                Some(HomeOutput::NoChange),
                "{legacy}"
            );
        }
    }

    #[test]
    fn unknown_tag_loads_as_absent() {
        assert_eq!(session_with_last("Turbo").to_cached().last, None);
        assert_eq!(session_with_last("").to_cached().last, None);
        assert_eq!(session_with_last("cool").to_cached().last, Some(HomeOutput::Cool));
    }

    #[test]
    fn loads_partial_document_with_defaults() {
        let state = StoredState::from_json(
            r#"{"controls":{"dry_run":false},"session":{"tolerated":1,"last":"Dry"}}"#,
        )
        .unwrap();

        assert_eq!(state.version, STORAGE_VERSION);
        assert!(state.controls.enabled);
        assert!(!state.controls.dry_run);
        assert_eq!(
            state.session.to_cached(),
            CachedState {
                reactivate_delay: 0,
                tolerated: 1,
                last: Some(HomeOutput::Dry),
                failed_to_change: 0,
            }
        );
        assert!(!state.auto_mode);
        assert!(state.recent_evaluations.is_empty());
    }

    #[test]
    fn session_export_uses_canonical_tags() {
        let session = CachedState {
            reactivate_delay: 2,
            tolerated: 0,
            last: Some(HomeOutput::NoChange),
            failed_to_change: 1,
        };
        let stored = StoredSession::from(&session);

        assert_eq!(stored.last.as_deref(), Some("NoChange"));
        assert_eq!(stored.to_cached(), session);
    }

    #[test]
    fn empty_document_is_fresh_state() {
        let state = StoredState::from_json("{}").unwrap();
        assert_eq!(state, StoredState::default());
        assert!(state.controls.dry_run);
    }
}
