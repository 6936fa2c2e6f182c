//! Per-target expiration records of one definition
//!
//! The store is loaded from the definition's status at the start of a pass,
//! owned by that pass, and rendered back into a status merge patch at the
//! end. Only confirmed expirations are ever recorded.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use iamra_common::crd::{DefinitionStatus, TargetRef};

/// Last-known credential expiration per target
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpirationStore {
    records: BTreeMap<TargetRef, DateTime<Utc>>,
    /// Status keys to remove on persist
    removed: BTreeSet<String>,
}

impl ExpirationStore {
    /// Load records from a definition's status
    ///
    /// Entries with malformed keys or timestamps are scheduled for removal,
    /// which makes their targets look never-issued.
    pub fn from_status(status: Option<&DefinitionStatus>) -> Self {
        let mut store = Self::default();
        let Some(status) = status else {
            return store;
        };
        for (key, value) in &status.expirations {
            let target = key.parse::<TargetRef>();
            let expiration = DateTime::parse_from_rfc3339(value);
            match (target, expiration) {
                (Ok(target), Ok(expiration)) => {
                    store.records.insert(target, expiration.with_timezone(&Utc));
                }
                _ => {
                    warn!(key = %key, value = %value, "dropping malformed expiration record");
                    store.removed.insert(key.clone());
                }
            }
        }
        store
    }

    /// Last confirmed expiration for `target`
    pub fn get(&self, target: &TargetRef) -> Option<DateTime<Utc>> {
        self.records.get(target).copied()
    }

    /// Record a confirmed expiration
    pub fn record(&mut self, target: TargetRef, expiration: DateTime<Utc>) {
        self.removed.remove(&target.to_string());
        self.records.insert(target, expiration);
    }

    /// Drop every record whose target isn't in `live`
    pub fn retain_targets(&mut self, live: &BTreeSet<TargetRef>) {
        let gone: Vec<TargetRef> = self
            .records
            .keys()
            .filter(|t| !live.contains(*t))
            .cloned()
            .collect();
        for target in gone {
            self.records.remove(&target);
            self.removed.insert(target.to_string());
        }
    }

    /// Live records in their `status.expirations` form
    pub fn expirations(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .map(|(target, expiration)| (target.to_string(), format_expiration(*expiration)))
            .collect()
    }

    /// Render as the `status.expirations` value of a JSON merge patch
    ///
    /// Removed keys map to `null` so the merge deletes them.
    pub fn to_merge_patch(&self) -> Value {
        let mut map = Map::new();
        for key in &self.removed {
            map.insert(key.clone(), Value::Null);
        }
        for (target, expiration) in &self.records {
            map.insert(target.to_string(), Value::String(format_expiration(*expiration)));
        }
        Value::Object(map)
    }
}

/// RFC3339 with second precision and a `Z` suffix
pub fn format_expiration(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    fn status(entries: &[(&str, &str)]) -> DefinitionStatus {
        DefinitionStatus {
            expirations: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn loads_records_from_status() {
        let store = ExpirationStore::from_status(Some(&status(&[(
            "prod/web-0",
            "2025-01-01T03:00:00Z",
        )])));
        assert_eq!(store.get(&TargetRef::new("prod", "web-0")), Some(at(3)));
        assert_eq!(store.get(&TargetRef::new("prod", "web-1")), None);
    }

    #[test]
    fn missing_status_is_empty() {
        assert!(ExpirationStore::from_status(None).expirations().is_empty());
    }

    #[test]
    fn malformed_records_are_removed_on_persist() {
        let store = ExpirationStore::from_status(Some(&status(&[
            ("not-a-key", "2025-01-01T03:00:00Z"),
            ("prod/web-0", "yesterday"),
        ])));
        assert!(store.expirations().is_empty());
        assert_eq!(
            store.to_merge_patch(),
            json!({"not-a-key": null, "prod/web-0": null})
        );
    }

    /// Story: a target that left the enumeration loses its record
    #[test]
    fn story_vanished_targets_are_nulled() {
        let mut store = ExpirationStore::from_status(Some(&status(&[
            ("prod/web-0", "2025-01-01T03:00:00Z"),
            ("prod/web-1", "2025-01-01T04:00:00Z"),
        ])));
        let live = BTreeSet::from([TargetRef::new("prod", "web-1")]);
        store.retain_targets(&live);
        store.record(TargetRef::new("prod", "web-2"), at(5));

        assert_eq!(
            store.expirations(),
            BTreeMap::from([
                ("prod/web-1".to_string(), "2025-01-01T04:00:00Z".to_string()),
                ("prod/web-2".to_string(), "2025-01-01T05:00:00Z".to_string()),
            ])
        );
        assert_eq!(
            store.to_merge_patch(),
            json!({
                "prod/web-0": null,
                "prod/web-1": "2025-01-01T04:00:00Z",
                "prod/web-2": "2025-01-01T05:00:00Z",
            })
        );
    }

    #[test]
    fn recording_overwrites_and_revives() {
        let mut store = ExpirationStore::default();
        let target = TargetRef::new("prod", "web-0");
        store.record(target.clone(), at(1));
        store.retain_targets(&BTreeSet::new());
        store.record(target.clone(), at(2));
        assert_eq!(store.get(&target), Some(at(2)));
        assert_eq!(
            store.to_merge_patch(),
            json!({"prod/web-0": "2025-01-01T02:00:00Z"})
        );
    }
}
