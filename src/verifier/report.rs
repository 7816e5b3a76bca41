//! Verification report types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::IndexCorruptionError;

/// Pass/fail status of a check or a whole report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Status {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six structural checks, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    BidirectionalConsistency,
    NetworkIntegrity,
    CoOccurrenceValidity,
    WeightConsistency,
    SelfLoopDetection,
    BidirectionalEdgeWeightMatch,
}

impl CheckName {
    pub const ALL: [Self; 6] = [
        Self::BidirectionalConsistency,
        Self::NetworkIntegrity,
        Self::CoOccurrenceValidity,
        Self::WeightConsistency,
        Self::SelfLoopDetection,
        Self::BidirectionalEdgeWeightMatch,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BidirectionalConsistency => "bidirectional_consistency",
            Self::NetworkIntegrity => "network_integrity",
            Self::CoOccurrenceValidity => "co_occurrence_validity",
            Self::WeightConsistency => "weight_consistency",
            Self::SelfLoopDetection => "self_loop_detection",
            Self::BidirectionalEdgeWeightMatch => "bidirectional_edge_weight_match",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One offending record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationDetail {
    /// `from -> to` is in the adjacency lists but `to -> from` is missing or
    /// carries a different weight.
    AdjacencyAsymmetry {
        from: EntityId,
        to: EntityId,
        weight: u64,
        reverse_weight: Option<u64>,
    },
    /// A canonical edge is absent from the adjacency lists or listed with a
    /// different weight.
    AdjacencyEdgeMismatch {
        source_id: EntityId,
        target_id: EntityId,
        weight: u64,
        adjacency_weight: Option<u64>,
    },
    /// An edge endpoint that is not a node of the snapshot.
    DanglingEndpoint {
        source_id: EntityId,
        target_id: EntityId,
        missing: EntityId,
    },
    /// A consumed co-occurrence whose entities are not in the snapshot.
    OrphanedCoOccurrence {
        sequence: u64,
        source_id: EntityId,
        target_id: EntityId,
        missing: Vec<EntityId>,
    },
    WeightMismatch {
        source_id: EntityId,
        target_id: EntityId,
        expected: u64,
        actual: u64,
        /// Declared connection types with no recorded sub-count.
        undocumented_types: Vec<String>,
    },
    SelfLoop {
        entity: EntityId,
        weight: u64,
        /// Ledger sequence numbers that contributed to the edge.
        contributing_records: Vec<u64>,
    },
    /// Display weight disagrees with the canonical weight, or one side has
    /// no counterpart.
    ReverseWeightMismatch {
        source_id: EntityId,
        target_id: EntityId,
        canonical_weight: Option<u64>,
        reverse_weight: Option<u64>,
    },
}

/// A non-fatal finding attributed to a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyWarning {
    pub check: CheckName,
    pub detail: ViolationDetail,
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: CheckName,
    pub status: Status,
    /// A failure of this check indicates corruption rather than data quality.
    pub fatal: bool,
    pub violation_count: usize,
    pub sample_violations: Vec<ViolationDetail>,
    #[serde(default)]
    pub warning_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_warnings: Vec<ViolationDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CheckResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }
}

/// Bounded accumulator for one check's findings.
#[derive(Debug)]
pub(crate) struct Findings {
    name: CheckName,
    fatal: bool,
    limit: usize,
    violation_count: usize,
    violations: Vec<ViolationDetail>,
    warning_count: usize,
    warnings: Vec<ViolationDetail>,
    note: Option<String>,
}

impl Findings {
    pub(crate) fn new(name: CheckName, fatal: bool, limit: usize) -> Self {
        Self {
            name,
            fatal,
            limit,
            violation_count: 0,
            violations: Vec::new(),
            warning_count: 0,
            warnings: Vec::new(),
            note: None,
        }
    }

    pub(crate) fn violation(&mut self, detail: ViolationDetail) {
        self.violation_count += 1;
        if self.violations.len() < self.limit {
            self.violations.push(detail);
        }
    }

    pub(crate) fn warning(&mut self, detail: ViolationDetail) {
        self.warning_count += 1;
        if self.warnings.len() < self.limit {
            self.warnings.push(detail);
        }
    }

    pub(crate) fn note(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
    }

    pub(crate) fn finish(self) -> CheckResult {
        CheckResult {
            name: self.name,
            status: if self.violation_count == 0 {
                Status::Pass
            } else {
                Status::Failed
            },
            fatal: self.fatal,
            violation_count: self.violation_count,
            sample_violations: self.violations,
            warning_count: self.warning_count,
            sample_warnings: self.warnings,
            note: self.note,
        }
    }
}

/// Structured verifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// PASS iff every check passed.
    pub status: Status,
    pub checks: Vec<CheckResult>,
    /// BLAKE3 digest of the verified snapshot.
    pub snapshot_digest: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl VerificationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }

    #[must_use]
    pub fn check(&self, name: CheckName) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn failed_checks(&self) -> Vec<CheckName> {
        self.checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.name)
            .collect()
    }

    /// All sampled warnings, in check order.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConsistencyWarning> {
        self.checks
            .iter()
            .flat_map(|c| {
                c.sample_warnings.iter().map(|detail| ConsistencyWarning {
                    check: c.name,
                    detail: detail.clone(),
                })
            })
            .collect()
    }

    /// Corruption error for failed fatal checks, if any.
    #[must_use]
    pub fn integrity_error(&self) -> Option<IndexCorruptionError> {
        let checks: Vec<String> = self
            .checks
            .iter()
            .filter(|c| c.fatal && !c.passed())
            .map(|c| c.name.to_string())
            .collect();
        if checks.is_empty() {
            None
        } else {
            Some(IndexCorruptionError::IntegrityCheckFailed { checks })
        }
    }

    /// Process exit status: 0 for PASS, 1 for FAILED.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}
