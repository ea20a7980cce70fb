pub mod alert;
pub mod device;
pub mod event;
pub mod global_rule;
pub mod organization;
pub mod retention;
pub mod rule;
pub mod synthetic_variable;
pub mod telemetry;
pub mod trash_log;
pub mod user;
pub mod variable;

pub use alert::Alert;
pub use device::Device;
pub use event::Event;
pub use global_rule::{GlobalAlert, GlobalRule};
pub use organization::Organization;
pub use retention::{DataArchiveExecution, DataRetentionPolicy};
pub use rule::Rule;
pub use synthetic_variable::{SyntheticVariable, SyntheticVariableValue};
pub use telemetry::TelemetryRecord;
pub use trash_log::TrashLog;
pub use user::{Role, User};
pub use variable::{Variable, VariableValue};
