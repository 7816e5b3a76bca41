//! Configuration for the resolution pipeline.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [canonicalizer]
//! threshold = 0.85
//!
//! [cross_reference]
//! threshold = 0.85
//! include_aliases = true
//!
//! [graph]
//! min_edge_weight = 3
//!
//! [verifier]
//! sample_limit = 100
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EntigraphError, EntigraphResult, ValidationError};
use crate::storage::StorageError;

/// Default similarity threshold for merging and matching.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Default bound on sample violations kept per verifier check.
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

fn check_threshold(name: &str, value: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidThreshold {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

/// Canonicalizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizerConfig {
    /// Minimum similarity for merging a mention into an existing cluster.
    pub threshold: f64,
    /// Compare mentions against clusters of a different entity type.
    pub match_across_types: bool,
    /// Mentions below this extractor confidence are rejected.
    pub min_confidence: f64,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            match_across_types: false,
            min_confidence: 0.0,
        }
    }
}

/// Cross-referencer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossReferenceConfig {
    pub threshold: f64,
    /// Score aliases as well as canonical names during fuzzy lookup.
    pub include_aliases: bool,
}

impl Default for CrossReferenceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            include_aliases: true,
        }
    }
}

/// Graph builder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Edges lighter than this are cut from snapshots, along with nodes left
    /// without edges.
    pub min_edge_weight: Option<u64>,
    /// Maintain the reverse-direction display edge list in snapshots.
    pub emit_reverse_edges: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_edge_weight: None,
            emit_reverse_edges: true,
        }
    }
}

/// Verifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub sample_limit: usize,
    /// Run the six checks on scoped threads.
    pub parallel: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            parallel: false,
        }
    }
}

/// Batch runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of reader workers.
    pub workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntigraphConfig {
    pub canonicalizer: CanonicalizerConfig,
    pub cross_reference: CrossReferenceConfig,
    pub graph: GraphConfig,
    pub verifier: VerifierConfig,
    pub runtime: RuntimeConfig,
}

impl EntigraphConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> EntigraphResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> EntigraphResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            EntigraphError::Storage(StorageError::Io {
                context: format!("reading config {}", path.display()),
                source: e,
            })
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_threshold("canonicalizer.threshold", self.canonicalizer.threshold)?;
        check_threshold("canonicalizer.min_confidence", self.canonicalizer.min_confidence)?;
        check_threshold("cross_reference.threshold", self.cross_reference.threshold)?;
        if self.verifier.sample_limit == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "verifier.sample_limit must be at least 1".to_string(),
            });
        }
        if self.runtime.workers == 0 || self.runtime.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "runtime.workers and runtime.queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Renders this configuration as TOML.
    pub fn to_toml_string(&self) -> EntigraphResult<String> {
        toml::to_string_pretty(self).map_err(|e| EntigraphError::internal(e.to_string()))
    }
}
