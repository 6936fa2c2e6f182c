//! Custom Resource Definitions for the credential operator

mod role_profile;
mod session;
mod types;

pub use role_profile::{RoleProfile, RoleProfileSpec};
pub use session::{Session, SessionSpec};
pub use types::{CredentialDefinition, CredentialSpec, DefinitionKind, DefinitionStatus, TargetRef};
