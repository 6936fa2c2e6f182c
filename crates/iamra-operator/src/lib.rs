//! IAM Roles Anywhere credential operator
//!
//! Wires the definition controllers and admission webhooks into one process.

#![deny(missing_docs)]

/// Command-line and environment configuration
pub mod config;
/// Controller futures for each definition kind
pub mod controller_runner;
/// Startup utilities (CRD install, webhook registration)
pub mod startup;
