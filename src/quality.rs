// ✅ Data integrity report
//
// Data-integrity problems never abort a build. Each one is logged with the
// offending UUID, collected here, and summarised at the end of the run.

use crate::entities::EntityClass;
use crate::error::IntegrityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Entity was skipped entirely
    Warning,  // Entity was kept, but some of its data could not be derived
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub class: EntityClass,
    /// None when not even the id could be read
    pub uuid: Option<Uuid>,
    pub kind: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        IntegrityReport { issues: Vec::new() }
    }

    /// Record an entity that was skipped
    pub fn skipped(&mut self, class: EntityClass, uuid: Option<Uuid>, error: &IntegrityError) {
        self.push(class, uuid, error, Severity::Critical);
    }

    /// Record an entity that was kept without (some of) its derived data
    pub fn degraded(&mut self, class: EntityClass, uuid: Option<Uuid>, error: &IntegrityError) {
        self.push(class, uuid, error, Severity::Warning);
    }

    fn push(&mut self, class: EntityClass, uuid: Option<Uuid>, error: &IntegrityError, severity: Severity) {
        let shown = uuid.map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());
        warn!(class = class.as_str(), uuid = %shown, kind = error.kind(), "{}", error);

        self.issues.push(IntegrityIssue {
            class,
            uuid,
            kind: error.kind().to_string(),
            message: error.to_string(),
            severity,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn for_class(&self, class: EntityClass) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(move |issue| issue.class == class)
    }

    pub fn extend(&mut self, other: IntegrityReport) {
        self.issues.extend(other.issues);
    }

    pub fn summary(&self) -> IntegritySummary {
        let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();

        for issue in &self.issues {
            *by_class.entry(issue.class.as_str().to_string()).or_default() += 1;
            *by_kind.entry(issue.kind.clone()).or_default() += 1;
        }

        IntegritySummary {
            total: self.issues.len(),
            skipped: self
                .issues
                .iter()
                .filter(|issue| issue.severity == Severity::Critical)
                .count(),
            by_class,
            by_kind,
        }
    }
}

/// Aggregate view printed at the end of a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegritySummary {
    pub total: usize,
    pub skipped: usize,
    pub by_class: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
}

impl IntegritySummary {
    pub fn describe(&self) -> String {
        if self.total == 0 {
            return "No data-integrity issues".to_string();
        }

        let classes: Vec<String> = self
            .by_class
            .iter()
            .map(|(class, count)| format!("{}={}", class, count))
            .collect();

        format!(
            "{} data-integrity issues ({} entities skipped): {}",
            self.total,
            self.skipped,
            classes.join(", ")
        )
    }
}
