//! Archival workflow: discovery, submission, verification, export

pub mod coordinator;
pub mod dispatcher;
pub mod export;
pub mod verifier;

pub use coordinator::{Coordinator, CycleConfig, CycleReport, RunMode};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use verifier::{apply_check, CheckVerdict, VerifyPolicy, VerifyReport, Verifier};
