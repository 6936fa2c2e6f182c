//! Credential lifecycle reconciliation
//!
//! Keeps the credential sidecar of every pod that references a `RoleProfile`
//! or `Session` supplied with unexpired credentials:
//!
//! - [`targets`] finds the pods referencing a definition
//! - [`scheduler`] decides per pod whether credentials are due
//! - [`executor`] issues credentials inside the pod and reads the expiration
//! - [`store`] holds confirmed expirations between passes
//! - [`controller`] drives one pass per definition and schedules the next

#![deny(missing_docs)]

pub mod command;
pub mod controller;
pub mod executor;
pub mod scheduler;
pub mod store;
pub mod targets;

pub use controller::{error_policy, reconcile, Context, ContextBuilder};
pub use executor::{CommandExecutor, FakeCommandExecutor, PodCommandExecutor};
