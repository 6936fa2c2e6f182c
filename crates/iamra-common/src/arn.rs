//! Amazon Resource Name parsing
//!
//! Only the structure needed to validate identifiers and extract the region
//! is parsed: `arn:<partition>:<service>:<region>:<account>:<resource>`.
//! The resource section keeps any further `:` or `/` separators verbatim.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const ARN_PREFIX: &str = "arn";
const SECTION_COUNT: usize = 6;

/// A parsed ARN
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arn {
    /// Partition, e.g. `aws` or `aws-cn`
    pub partition: String,
    /// Service namespace, e.g. `rolesanywhere` or `iam`
    pub service: String,
    /// Region; empty for global resources such as IAM roles
    pub region: String,
    /// Account ID; empty for some AWS-managed resources
    pub account_id: String,
    /// Resource path, e.g. `trust-anchor/abc`
    pub resource: String,
}

/// Why an identifier is not a valid ARN
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArnError {
    /// Does not start with `arn:`
    #[error("must start with \"arn:\"")]
    MissingPrefix,
    /// Fewer than six `:`-separated sections
    #[error("must have 6 sections separated by ':' but has {0}")]
    SectionCount(usize),
    /// A required section is empty
    #[error("{0} must not be empty")]
    EmptySection(&'static str),
    /// Region contains characters outside `[a-z0-9-]`
    #[error("region {0:?} contains invalid characters")]
    InvalidRegion(String),
    /// Account contains non-alphanumeric characters
    #[error("account {0:?} contains invalid characters")]
    InvalidAccount(String),
}

impl Arn {
    /// Parse and validate an identifier
    pub fn parse(value: &str) -> Result<Self, ArnError> {
        let sections: Vec<&str> = value.splitn(SECTION_COUNT, ':').collect();
        if sections.first() != Some(&ARN_PREFIX) {
            return Err(ArnError::MissingPrefix);
        }
        if sections.len() != SECTION_COUNT {
            return Err(ArnError::SectionCount(sections.len()));
        }

        let (partition, service, region, account_id, resource) = (
            sections[1],
            sections[2],
            sections[3],
            sections[4],
            sections[5],
        );

        if partition.is_empty() {
            return Err(ArnError::EmptySection("partition"));
        }
        if service.is_empty() {
            return Err(ArnError::EmptySection("service"));
        }
        if resource.is_empty() {
            return Err(ArnError::EmptySection("resource"));
        }
        if !region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ArnError::InvalidRegion(region.to_string()));
        }
        if !account_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ArnError::InvalidAccount(account_id.to_string()));
        }

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// Validate an identifier and return its region (empty for global resources)
pub fn validate(value: &str) -> Result<String, ArnError> {
    Arn::parse(value).map(|arn| arn.region)
}
