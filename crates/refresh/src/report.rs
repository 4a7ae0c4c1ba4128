use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use invsync_storage::{EntityKind, UpsertAction};

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Ok,
    Failed { reason: String },
}

/// A non-fatal problem found during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshWarning {
    /// The record could not be classified and was skipped, or some of its
    /// fields were dropped.
    Classification {
        kind: EntityKind,
        remote_ref: String,
        message: String,
    },
    /// A reference could not be turned into an edge; the edge is left unset.
    RelationshipGap {
        kind: EntityKind,
        remote_ref: String,
        edge: String,
        message: String,
    },
}

impl RefreshWarning {
    pub fn is_gap(&self) -> bool {
        matches!(self, RefreshWarning::RelationshipGap { .. })
    }
}

impl std::fmt::Display for RefreshWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshWarning::Classification {
                kind,
                remote_ref,
                message,
            } => write!(f, "{} '{}': {}", kind, remote_ref, message),
            RefreshWarning::RelationshipGap {
                kind,
                remote_ref,
                edge,
                message,
            } => write!(f, "{} '{}' {}: {}", kind, remote_ref, edge, message),
        }
    }
}

/// Per-kind counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub reactivated: usize,
    pub retired: usize,
    pub skipped: usize,
}

impl KindStats {
    pub fn record(&mut self, action: UpsertAction) {
        match action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
            UpsertAction::Reactivated => self.reactivated += 1,
        }
    }

    /// Records present after the pass that were seen in it.
    pub fn seen(&self) -> usize {
        self.created + self.updated + self.unchanged + self.reactivated
    }
}

/// Result of one refresh pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub target_id: String,
    pub outcome: RefreshOutcome,
    pub api_version: Option<String>,
    pub snapshot_digest: Option<String>,
    /// The snapshot digest equals the one applied by the previous
    /// successful pass.
    pub unchanged: bool,
    pub started_at: String,
    pub finished_at: String,
    pub stats: BTreeMap<EntityKind, KindStats>,
    pub warnings: Vec<RefreshWarning>,
}

impl RefreshReport {
    pub fn is_ok(&self) -> bool {
        self.outcome == RefreshOutcome::Ok
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            RefreshOutcome::Ok => None,
            RefreshOutcome::Failed { reason } => Some(reason),
        }
    }

    pub fn stats_for(&self, kind: EntityKind) -> KindStats {
        self.stats.get(&kind).copied().unwrap_or_default()
    }

    pub fn gaps(&self) -> impl Iterator<Item = &RefreshWarning> {
        self.warnings.iter().filter(|w| w.is_gap())
    }

    pub fn classification_warnings(&self) -> impl Iterator<Item = &RefreshWarning> {
        self.warnings.iter().filter(|w| !w.is_gap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_status_tag() {
        let failed = RefreshOutcome::Failed {
            reason: "boom".into(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"status": "failed", "reason": "boom"})
        );
        assert_eq!(
            serde_json::to_value(RefreshOutcome::Ok).unwrap(),
            serde_json::json!({"status": "ok"})
        );
    }

    #[test]
    fn warning_display() {
        let gap = RefreshWarning::RelationshipGap {
            kind: EntityKind::ConfigurationScript,
            remote_ref: "90".into(),
            edge: "parent".into(),
            message: "script '91' not in snapshot".into(),
        };
        assert!(gap.is_gap());
        assert_eq!(
            gap.to_string(),
            "configuration_script '90' parent: script '91' not in snapshot"
        );
    }

    #[test]
    fn stats_record_actions() {
        let mut stats = KindStats::default();
        stats.record(UpsertAction::Created);
        stats.record(UpsertAction::Unchanged);
        stats.record(UpsertAction::Reactivated);
        assert_eq!(stats.seen(), 3);
        assert_eq!(stats.updated, 0);
    }
}
