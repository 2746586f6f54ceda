//! Rule sources for the schedule monitor.
//!
//! Rules live in a JSON file as `{"schedules": [...]}`, human-editable and
//! re-read on every tick. A broken entry is skipped, the rest still load.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;

use diffuser_core::error::{DiffuserError, Result};
use diffuser_core::traits::RuleStore;
use diffuser_core::types::{RuleDraft, ScheduleRule};

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    schedules: Vec<serde_json::Value>,
}

/// File-based rule store.
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Parse a rule file body. Malformed entries are logged and dropped.
    ///
    /// Stored rules must carry an id, unique within the file: the monitor
    /// tells runs apart by it.
    pub fn parse(json: &str) -> Result<Vec<ScheduleRule>> {
        let file: RuleFile = serde_json::from_str(json)?;
        let mut rules = Vec::with_capacity(file.schedules.len());
        let mut seen = HashSet::new();
        for (index, entry) in file.schedules.into_iter().enumerate() {
            let parsed = serde_json::from_value::<RuleDraft>(entry)
                .map_err(|e| DiffuserError::MalformedRule(e.to_string()))
                .and_then(|draft| stored_rule(draft, &mut seen));
            match parsed {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("⚠️ Skipping schedule #{index}: {e}"),
            }
        }
        Ok(rules)
    }
}

/// Validate a stored entry, which unlike a fresh draft must have an unseen id.
fn stored_rule(draft: RuleDraft, seen: &mut HashSet<u64>) -> Result<ScheduleRule> {
    let Some(id) = draft.id else {
        return Err(DiffuserError::MalformedRule("missing required field: id".into()));
    };
    if !seen.insert(id) {
        return Err(DiffuserError::MalformedRule(format!("duplicate id {id}")));
    }
    draft.validate()
}

impl RuleStore for JsonRuleStore {
    fn load_all(&self) -> Result<Vec<ScheduleRule>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| DiffuserError::Store(format!("read {}: {e}", self.path.display())))?;
        let rules = Self::parse(&json)
            .map_err(|e| DiffuserError::Store(format!("parse {}: {e}", self.path.display())))?;
        tracing::debug!("💾 Loaded {} rules from {}", rules.len(), self.path.display());
        Ok(rules)
    }
}

/// In-memory rule store for tests and embedding.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<ScheduleRule>>,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<ScheduleRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    fn rules(&self) -> MutexGuard<'_, Vec<ScheduleRule>> {
        self.rules.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the whole rule set.
    pub fn set(&self, rules: Vec<ScheduleRule>) {
        *self.rules() = rules;
    }
}

impl RuleStore for MemoryRuleStore {
    fn load_all(&self) -> Result<Vec<ScheduleRule>> {
        Ok(self.rules().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffuser_core::types::Channel;

    #[test]
    fn test_missing_file_is_empty() {
        let store = JsonRuleStore::new(&std::env::temp_dir().join("diffuser-test-no-such-rules.json"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_load_with_legacy_fields() {
        let dir = std::env::temp_dir().join("diffuser-test-store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("schedules.json");
        std::fs::write(
            &path,
            r#"{"schedules": [
                {"id": 1, "start_time": "9:00", "end_time": "10:00", "formula": "red",
                 "cycle_time": 30, "duration": 5, "recurrence": "weekdays", "enabled": true},
                {"id": 2, "start_time": "22:00", "end_time": "01:00", "channel": "blue"}
            ]}"#,
        )
        .unwrap();

        let rules = JsonRuleStore::new(&path).load_all().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].channel(), Channel::Red);
        assert_eq!(rules[0].pulse_duration(), 5);
        assert_eq!(rules[1].cycle_time(), 60);
        assert!(rules[1].is_overnight());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let rules = JsonRuleStore::parse(
            r#"{"schedules": [
                {"id": 1, "start_time": "25:00", "end_time": "10:00", "channel": "red"},
                {"id": 2, "start_time": "09:00", "end_time": "10:00", "channel": "purple"},
                {"id": 3, "start_time": "09:00", "end_time": "10:00", "channel": "red", "cycle_time": 10, "pulse_duration": 10},
                {"id": 4, "start_time": "09:00", "end_time": "10:00", "channel": "green"},
                "not even an object"
            ]}"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id(), 4);
    }

    #[test]
    fn test_entries_need_unique_ids() {
        let rules = JsonRuleStore::parse(
            r#"{"schedules": [
                {"start_time": "09:00", "end_time": "10:00", "channel": "red"},
                {"id": 5, "start_time": "10:00", "end_time": "11:00", "channel": "red"},
                {"id": 5, "start_time": "12:00", "end_time": "13:00", "channel": "blue"},
                {"id": 6, "start_time": "13:00", "end_time": "14:00", "channel": "blue"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<u64> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(rules[0].channel(), Channel::Red);
    }

    #[test]
    fn test_unreadable_file_is_store_error() {
        let dir = std::env::temp_dir().join("diffuser-test-store-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("schedules.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonRuleStore::new(&path).load_all(),
            Err(DiffuserError::Store(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_store_set() {
        let store = MemoryRuleStore::default();
        assert!(store.load_all().unwrap().is_empty());
        let rule = RuleDraft::new("9:00", "10:00", "red", "daily").validate().unwrap();
        store.set(vec![rule]);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
