//! Typed view of a build task's `config` JSON column.
//!
//! Storage keeps the open camelCase map so submitters can add keys of their
//! own. Everything in memory goes through [`TaskConfig`]; mutations of
//! `attemptCount`, `lastError` and `progress` are applied in SQL with
//! `jsonb_set` so unknown keys survive.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults;

/// Running totals persisted while a build is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildProgress {
    /// Pages fetched successfully.
    pub crawled: u64,
    pub new: u64,
    pub updated: u64,
    /// Pages whose content hash matched the stored one.
    pub skipped: u64,
    pub errors: u64,
}

impl BuildProgress {
    /// Pages that reached classification (new, updated or unchanged).
    pub fn processed(&self) -> u64 {
        self.new + self.updated + self.skipped
    }

    /// A run with errors and nothing processed is a full failure.
    pub fn is_total_failure(&self) -> bool {
        self.errors > 0 && self.processed() == 0
    }
}

/// Build task configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    /// Minimum interval between requests in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    /// Explicit URL list. When non-empty, no links are followed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<BuildProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

impl TaskConfig {
    /// Read a config column.
    ///
    /// A column that does not deserialize as a whole still yields its attempt
    /// count and last error, so a malformed submitter key never resets the
    /// retry budget.
    pub fn from_json(value: Option<&JsonValue>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        match serde_json::from_value::<TaskConfig>(value.clone()) {
            Ok(config) => config,
            Err(_) => Self {
                attempt_count: value
                    .get("attemptCount")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0) as i32,
                last_error: value
                    .get("lastError")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
                ..Self::default()
            },
        }
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| JsonValue::Object(Default::default()))
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth.unwrap_or(defaults::CRAWL_MAX_DEPTH)
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages.unwrap_or(defaults::CRAWL_MAX_PAGES).max(1)
    }

    pub fn rate_limit_ms(&self) -> u64 {
        self.rate_limit.unwrap_or(defaults::CRAWL_RATE_LIMIT_MS)
    }

    pub fn auto_publish(&self) -> bool {
        self.auto_publish.unwrap_or(defaults::AUTO_PUBLISH)
    }

    /// Explicit-URL mode processes exactly `urls` and follows no links.
    pub fn is_explicit(&self) -> bool {
        !self.urls.is_empty()
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }

    pub fn with_rate_limit(mut self, ms: u64) -> Self {
        self.rate_limit = Some(ms);
        self
    }

    pub fn with_auto_publish(mut self, enabled: bool) -> Self {
        self.auto_publish = Some(enabled);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_none_is_default() {
        let config = TaskConfig::from_json(None);
        assert_eq!(config, TaskConfig::default());
        assert_eq!(config.attempt_count, 0);
        assert!(config.auto_publish());
    }

    #[test]
    fn test_from_json_camel_case_keys() {
        let value = json!({
            "maxDepth": 2,
            "maxPages": 40,
            "rateLimit": 250,
            "includePatterns": ["/docs/**"],
            "excludePatterns": ["/blog/*"],
            "attemptCount": 2,
            "lastError": "recovered from stale running state",
            "autoPublish": false
        });
        let config = TaskConfig::from_json(Some(&value));
        assert_eq!(config.max_depth(), 2);
        assert_eq!(config.max_pages(), 40);
        assert_eq!(config.rate_limit_ms(), 250);
        assert_eq!(config.include_patterns, vec!["/docs/**"]);
        assert_eq!(config.exclude_patterns, vec!["/blog/*"]);
        assert_eq!(config.attempt_count, 2);
        assert!(!config.auto_publish());
        assert!(!config.is_explicit());
    }

    #[test]
    fn test_from_json_ignores_unknown_keys() {
        let value = json!({"submittedBy": "ops", "urls": ["https://a.example/x"]});
        let config = TaskConfig::from_json(Some(&value));
        assert!(config.is_explicit());
        assert_eq!(config.urls.len(), 1);
    }

    #[test]
    fn test_from_json_malformed_keeps_attempts() {
        let value = json!({"maxDepth": "deep", "attemptCount": 2, "lastError": "boom"});
        let config = TaskConfig::from_json(Some(&value));
        assert_eq!(config.attempt_count, 2);
        assert_eq!(config.last_error.as_deref(), Some("boom"));
        assert_eq!(config.max_depth, None);
    }

    #[test]
    fn test_defaults_applied() {
        let config = TaskConfig::default();
        assert_eq!(config.max_depth(), defaults::CRAWL_MAX_DEPTH);
        assert_eq!(config.rate_limit_ms(), defaults::CRAWL_RATE_LIMIT_MS);
        assert_eq!(config.max_pages(), defaults::CRAWL_MAX_PAGES);
    }

    #[test]
    fn test_to_json_skips_empty_fields() {
        let config = TaskConfig::default().with_max_depth(1);
        let value = config.to_json();
        assert_eq!(value, json!({"maxDepth": 1, "attemptCount": 0}));
    }

    #[test]
    fn test_progress_total_failure() {
        let failed = BuildProgress {
            errors: 3,
            ..Default::default()
        };
        assert!(failed.is_total_failure());

        let partial = BuildProgress {
            crawled: 2,
            new: 1,
            skipped: 1,
            errors: 3,
            ..Default::default()
        };
        assert!(!partial.is_total_failure());
        assert_eq!(partial.processed(), 2);
    }
}
