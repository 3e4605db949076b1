//! Administration documents: the declared data sources and the persisted
//! per-technique score logbooks.
//!
//! Both documents are YAML on disk; this module only defines their shape
//! and the pure derivations over them (quality aggregation, registry
//! filtering). Reading and writing lives in `sightline-store`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use time::Date;

pub const FILE_TYPE_DATA_SOURCE_ADMINISTRATION: &str = "data-source-administration";
pub const FILE_TYPE_TECHNIQUE_ADMINISTRATION: &str = "technique-administration";

pub const DATA_SOURCE_ADMINISTRATION_VERSION: f64 = 1.0;
pub const TECHNIQUE_ADMINISTRATION_VERSION: f64 = 1.1;

/// Visibility scores are 0..=4; detection scores are -1..=5, where -1 marks
/// a placeholder that has not been assessed yet.
pub const VISIBILITY_SCORE_RANGE: (i32, i32) = (0, 4);
pub const DETECTION_SCORE_RANGE: (i32, i32) = (-1, 5);

/// The five ordinal quality dimensions of one data source.
///
/// The scale is open-ended on purpose; values outside 0..=5 are flagged by
/// health validation but never rejected here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityAssessment {
    #[serde(default)]
    pub device_completeness: u8,
    #[serde(default)]
    pub data_field_completeness: u8,
    #[serde(default)]
    pub timeliness: u8,
    #[serde(default)]
    pub consistency: u8,
    #[serde(default)]
    pub retention: u8,
}

impl QualityAssessment {
    /// Weighted aggregate quality score in `[0, 5]` for in-range inputs.
    ///
    /// Device completeness, field completeness and retention weigh double;
    /// zero-valued dimensions still count in the denominator.
    #[must_use]
    pub fn weighted_score(&self) -> f64 {
        let weighted = [
            (self.device_completeness, 2.0),
            (self.data_field_completeness, 2.0),
            (self.retention, 2.0),
            (self.timeliness, 1.0),
            (self.consistency, 1.0),
        ];

        let mut score = 0.0;
        let mut denominator = 0.0;
        for (value, weight) in weighted {
            score += f64::from(value) * weight;
            denominator += weight;
        }

        if score > 0.0 {
            score / denominator
        } else {
            0.0
        }
    }

    /// True when the four dimensions required for coverage scoring are all
    /// strictly positive. Retention is deliberately not part of this gate.
    #[must_use]
    pub fn is_complete_for_scoring(&self) -> bool {
        self.device_completeness > 0
            && self.data_field_completeness > 0
            && self.timeliness > 0
            && self.consistency > 0
    }
}

/// Display tier (1..=5) for a continuous quality score; `None` is the
/// no-score sentinel for values at or above 6.
#[must_use]
pub fn quality_tier(score: f64) -> Option<u8> {
    if score < 2.0 {
        Some(1)
    } else if score < 3.0 {
        Some(2)
    } else if score < 4.0 {
        Some(3)
    } else if score < 5.0 {
        Some(4)
    } else if score < 6.0 {
        Some(5)
    } else {
        None
    }
}

/// One declared telemetry capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSource {
    pub data_source_name: String,
    #[serde(default, with = "crate::iso_date")]
    pub date_registered: Option<Date>,
    #[serde(default, with = "crate::iso_date")]
    pub date_connected: Option<Date>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub available_for_data_analytics: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub data_quality: QualityAssessment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TechniqueException {
    pub technique_id: String,
}

/// The data-source administration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceAdminDoc {
    pub version: f64,
    pub file_type: String,
    pub name: String,
    pub platform: String,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub exceptions: Vec<TechniqueException>,
}

impl DataSourceAdminDoc {
    /// The owned-data-source registry, keyed by data source name.
    ///
    /// With `filter_incomplete` set, sources whose quality assessment is not
    /// complete for scoring are left out; this is the default for every
    /// scoring path. The unfiltered registry is used for full inventory
    /// reports such as the scored matrix.
    #[must_use]
    pub fn owned_sources(&self, filter_incomplete: bool) -> BTreeMap<String, DataSource> {
        self.data_sources
            .iter()
            .filter(|source| !filter_incomplete || source.data_quality.is_complete_for_scoring())
            .map(|source| (source.data_source_name.clone(), source.clone()))
            .collect()
    }

    /// Suppressed technique IDs, uppercased for comparison.
    #[must_use]
    pub fn exception_ids(&self) -> BTreeSet<String> {
        self.exceptions
            .iter()
            .map(|exception| exception.technique_id.to_uppercase())
            .collect()
    }
}

/// One entry in a score logbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreLogEntry {
    #[serde(default, with = "crate::iso_date")]
    pub date: Option<Date>,
    pub score: i32,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_generated: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// One visibility sub-record, scoped by `applicable_to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisibilityScope {
    pub applicable_to: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub score_logbook: Vec<ScoreLogEntry>,
}

/// One detection sub-record, scoped by `applicable_to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionScope {
    pub applicable_to: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub score_logbook: Vec<ScoreLogEntry>,
}

/// One technique in the technique administration document.
///
/// Hand-maintained files are allowed to write `detection`/`visibility` as
/// either a single mapping or a list of mappings; both parse to a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TechniqueEntry {
    pub technique_id: String,
    pub technique_name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub detection: Vec<DetectionScope>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub visibility: Vec<VisibilityScope>,
}

/// The technique administration document: the persisted score-history
/// store that reconciliation reads and rewrites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechniqueAdminDoc {
    pub version: f64,
    pub file_type: String,
    pub name: String,
    pub platform: String,
    #[serde(default)]
    pub techniques: Vec<TechniqueEntry>,
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}
