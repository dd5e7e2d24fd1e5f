pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod rules;
pub mod store;
pub mod topics;
pub mod types;

pub use config::{ControlKey, ControlState, NetworkConfig, RuleParameters, RuntimeConfig};
pub use coordinator::{
    Coordinator, Diagnostics, Evaluation, EvaluationError, EvaluationRecord, Notification, Plan,
    Trigger,
};
pub use gateway::{InputError, InputKind, RawReading};
pub use rules::{CachedState, Decision, HomeInput};
pub use store::StoredState;
pub use topics::*;
pub use types::{AirconMode, ApplianceCommand, ControlMode, ControllerStatus, HomeOutput};
