//! Graph verification.
//!
//! [`GraphVerifier`] certifies a [`GraphSnapshot`] against six structural
//! checks. Every check runs every time; failures accumulate into one
//! [`VerificationReport`].
//!
//! ```text
//! Idle ──► Running(bidirectional_consistency) ──► ... ──► Running(bidirectional_edge_weight_match)
//!                                                                 │
//!                                                                 ▼
//!                                                         Completed(report)
//! ```
//!
//! Checks 1 and 2, and check 3 when no weight cutoff is in force, are fatal:
//! their failure means prior writes were defective. The report's
//! [`VerificationReport::integrity_error`] names them.

mod checks;
mod report;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use report::{
    CheckName, CheckResult, ConsistencyWarning, Status, VerificationReport, ViolationDetail,
};

use crate::config::VerifierConfig;
use crate::error::{EntigraphError, EntigraphResult, ValidationError};
use crate::graph::GraphSnapshot;

/// Source of report timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Verifier lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierState {
    Idle,
    /// Sequential run, currently inside `check`.
    Running { check: CheckName },
    /// All checks running on scoped threads.
    RunningParallel,
    Completed(Box<VerificationReport>),
}

/// Runs the six checks over immutable snapshots.
///
/// # Examples
///
/// ```
/// use entigraph::config::VerifierConfig;
/// use entigraph::graph::GraphSnapshot;
/// use entigraph::verifier::{GraphVerifier, Status};
///
/// let mut verifier = GraphVerifier::new(VerifierConfig::default())?;
/// let report = verifier.verify(&GraphSnapshot::default())?;
/// assert_eq!(report.status, Status::Pass);
/// assert_eq!(report.checks.len(), 6);
/// assert_eq!(report.exit_code(), 0);
/// # Ok::<(), entigraph::EntigraphError>(())
/// ```
pub struct GraphVerifier {
    config: VerifierConfig,
    clock: Clock,
    state: VerifierState,
}

impl fmt::Debug for GraphVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphVerifier")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl GraphVerifier {
    /// Creates a verifier stamping reports with the system clock.
    pub fn new(config: VerifierConfig) -> Result<Self, ValidationError> {
        if config.sample_limit == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "verifier.sample_limit must be at least 1".to_string(),
            });
        }
        Ok(Self {
            config,
            clock: Arc::new(Utc::now),
            state: VerifierState::Idle,
        })
    }

    /// Replaces the report clock. Reports for the same snapshot are
    /// byte-identical only when the clock is fixed; with the default
    /// `Utc::now` clock every field except `generated_at` is reproducible.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn state(&self) -> &VerifierState {
        &self.state
    }

    /// The last completed report, if any.
    #[must_use]
    pub fn last_report(&self) -> Option<&VerificationReport> {
        match &self.state {
            VerifierState::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// Runs the checks, on scoped threads if `config.parallel` is set.
    pub fn run(&mut self, snapshot: &GraphSnapshot) -> EntigraphResult<VerificationReport> {
        if self.config.parallel {
            self.verify_parallel(snapshot)
        } else {
            self.verify(snapshot)
        }
    }

    /// Runs the six checks one after another.
    ///
    /// The outcome is a pure function of the snapshot apart from
    /// `generated_at`, which comes from the configured clock. Inject a fixed
    /// clock with [`GraphVerifier::with_clock`] for reproducible reports.
    pub fn verify(&mut self, snapshot: &GraphSnapshot) -> EntigraphResult<VerificationReport> {
        let mut results = Vec::with_capacity(CheckName::ALL.len());
        for name in CheckName::ALL {
            self.state = VerifierState::Running { check: name };
            tracing::debug!(check = %name, "running graph check");
            results.push(checks::run_check(name, snapshot, self.config.sample_limit));
        }
        self.complete(snapshot, results)
    }

    /// Runs the six checks concurrently. Under the same clock the report is
    /// identical to the one [`GraphVerifier::verify`] produces.
    pub fn verify_parallel(
        &mut self,
        snapshot: &GraphSnapshot,
    ) -> EntigraphResult<VerificationReport> {
        self.state = VerifierState::RunningParallel;
        let limit = self.config.sample_limit;

        let joined: Vec<std::thread::Result<CheckResult>> = std::thread::scope(|scope| {
            let handles: Vec<_> = CheckName::ALL
                .into_iter()
                .map(|name| scope.spawn(move || checks::run_check(name, snapshot, limit)))
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let mut results = Vec::with_capacity(joined.len());
        for (name, result) in CheckName::ALL.into_iter().zip(joined) {
            let result = result.map_err(|_| {
                self.state = VerifierState::Idle;
                EntigraphError::internal(format!("check {name} panicked"))
            })?;
            results.push(result);
        }
        self.complete(snapshot, results)
    }

    fn complete(
        &mut self,
        snapshot: &GraphSnapshot,
        checks: Vec<CheckResult>,
    ) -> EntigraphResult<VerificationReport> {
        let snapshot_digest = match snapshot.digest() {
            Ok(digest) => digest,
            Err(e) => {
                self.state = VerifierState::Idle;
                return Err(e);
            }
        };
        let status = if checks.iter().all(CheckResult::passed) {
            Status::Pass
        } else {
            Status::Failed
        };
        let report = VerificationReport {
            status,
            checks,
            snapshot_digest,
            node_count: snapshot.node_count(),
            edge_count: snapshot.edge_count(),
            generated_at: (self.clock)(),
        };

        for check in &report.checks {
            if check.warning_count > 0 {
                tracing::warn!(
                    check = %check.name,
                    warnings = check.warning_count,
                    "graph check reported consistency warnings"
                );
            }
            if !check.passed() {
                if check.fatal {
                    tracing::error!(
                        check = %check.name,
                        violations = check.violation_count,
                        "fatal graph integrity failure"
                    );
                } else {
                    tracing::warn!(
                        check = %check.name,
                        violations = check.violation_count,
                        "graph check failed"
                    );
                }
            }
        }
        tracing::info!(
            status = %report.status,
            nodes = report.node_count,
            edges = report.edge_count,
            digest = %report.snapshot_digest,
            "graph verification completed"
        );

        self.state = VerifierState::Completed(Box::new(report.clone()));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CanonicalEntity, EntityType};
    use crate::graph::{Edge, SourceKind};
    use chrono::TimeZone;

    fn fixed_clock() -> Clock {
        Arc::new(|| Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
    }

    fn verifier(parallel: bool) -> GraphVerifier {
        GraphVerifier::new(VerifierConfig {
            parallel,
            ..VerifierConfig::default()
        })
        .unwrap()
        .with_clock(fixed_clock())
    }

    fn broken_snapshot() -> GraphSnapshot {
        let a = CanonicalEntity::new("Jeffrey Epstein", EntityType::Person);
        let b = CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person);
        let mut edge = Edge::new(a.id, b.id);
        edge.record(SourceKind::Document, 205);
        edge.record(SourceKind::FlightLog, 291);
        edge.weight = 205;
        let mut self_loop = Edge::new(a.id, a.id);
        self_loop.record(SourceKind::Document, 5);
        GraphSnapshot::new(vec![a, b], vec![edge, self_loop]).with_mirrored_reverse_edges()
    }

    #[test]
    fn test_state_machine() {
        let mut verifier = verifier(false);
        assert_eq!(verifier.state(), &VerifierState::Idle);
        let report = verifier.verify(&GraphSnapshot::default()).unwrap();
        assert!(matches!(verifier.state(), VerifierState::Completed(_)));
        assert_eq!(verifier.last_report(), Some(&report));
    }

    #[test]
    fn test_all_checks_run_without_short_circuit() {
        let report = verifier(false).verify(&broken_snapshot()).unwrap();
        assert_eq!(report.status, Status::Failed);
        assert_eq!(report.checks.len(), 6);
        assert_eq!(
            report.failed_checks(),
            vec![CheckName::WeightConsistency, CheckName::SelfLoopDetection]
        );
        assert!(report.integrity_error().is_none());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_fatal_failure_yields_integrity_error() {
        let mut snapshot = broken_snapshot();
        snapshot.nodes.truncate(1);
        let report = verifier(false).verify(&snapshot).unwrap();
        let err = report.integrity_error().unwrap();
        assert!(err.to_string().contains("network_integrity"));
    }

    #[test]
    fn test_verification_is_deterministic() {
        let snapshot = broken_snapshot();
        let mut verifier = verifier(false);
        let first = verifier.verify(&snapshot).unwrap();
        let second = verifier.verify(&snapshot).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_default_clock_only_varies_timestamp() {
        let snapshot = broken_snapshot();
        let mut verifier = GraphVerifier::new(VerifierConfig::default()).unwrap();
        let first = verifier.verify(&snapshot).unwrap();
        let mut second = verifier.verify(&snapshot).unwrap();
        assert!(second.generated_at >= first.generated_at);
        second.generated_at = first.generated_at;
        assert_eq!(first, second);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let snapshot = broken_snapshot();
        let sequential = verifier(false).verify(&snapshot).unwrap();
        let parallel = verifier(true).run(&snapshot).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_zero_sample_limit_rejected() {
        let config = VerifierConfig {
            sample_limit: 0,
            ..VerifierConfig::default()
        };
        assert!(GraphVerifier::new(config).is_err());
    }
}
