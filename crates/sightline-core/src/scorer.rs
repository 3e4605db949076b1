//! Coverage scorer: owned data sources versus the data sources each
//! technique requires.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::Date;

use crate::admin::{
    DataSource, DetectionScope, ScoreLogEntry, TechniqueAdminDoc, TechniqueEntry, VisibilityScope,
    FILE_TYPE_TECHNIQUE_ADMINISTRATION, TECHNIQUE_ADMINISTRATION_VERSION,
};
use crate::taxonomy::TechniqueRecord;

/// Derived coverage for one technique.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CoverageResult {
    pub technique_id: String,
    pub technique_name: String,
    /// Owned data sources that the technique requires.
    pub matched: Vec<String>,
    /// Everything the technique requires.
    pub required: Vec<String>,
    pub tactics: Vec<String>,
    /// Products supplying the matched data sources.
    pub products: BTreeSet<String>,
    pub percentage: f64,
}

impl CoverageResult {
    #[must_use]
    pub fn visibility_tier(&self) -> u8 {
        visibility_tier(self.percentage)
    }
}

/// Maps a coverage percentage to the discrete visibility tier.
///
/// Boundaries are closed-upper: exactly 49 is still tier 1, exactly 74
/// still tier 2, exactly 99 still tier 3.
#[must_use]
pub fn visibility_tier(percentage: f64) -> u8 {
    if percentage <= 0.0 {
        0
    } else if percentage <= 49.0 {
        1
    } else if percentage <= 74.0 {
        2
    } else if percentage <= 99.0 {
        3
    } else {
        4
    }
}

/// Scores every technique with a non-empty required-data-source list.
///
/// Techniques without required data sources are excluded entirely rather
/// than scored as zero. Techniques on the exception list are computed but
/// left out of the returned set.
#[must_use]
pub fn score(
    techniques: &[TechniqueRecord],
    owned: &BTreeMap<String, DataSource>,
    exceptions: &BTreeSet<String>,
) -> Vec<CoverageResult> {
    let mut results = Vec::new();

    for technique in techniques {
        if technique.data_sources.is_empty() {
            continue;
        }

        let matched: Vec<String> = technique
            .data_sources
            .iter()
            .filter(|name| owned.contains_key(name.as_str()))
            .cloned()
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let percentage =
            (matched.len() as f64 / technique.data_sources.len() as f64) * 100.0;

        if exceptions.contains(&technique.technique_id.to_uppercase()) {
            continue;
        }

        let mut products = BTreeSet::new();
        for name in &matched {
            if let Some(source) = owned.get(name) {
                products.extend(source.products.iter().cloned());
            }
        }

        results.push(CoverageResult {
            technique_id: technique.technique_id.clone(),
            technique_name: technique.name.clone(),
            matched,
            required: technique.data_sources.clone(),
            tactics: technique.tactics.clone(),
            products,
            percentage,
        });
    }

    results
}

/// Builds a fresh technique administration document from scored coverage.
///
/// Only techniques with a visibility tier above zero are emitted. Each
/// entry gets the derived visibility logbook head (auto-generated, dated
/// `today`) and a placeholder detection scope that has not been assessed.
#[must_use]
pub fn derive_admin_doc(
    results: &[CoverageResult],
    name: &str,
    platform: &str,
    today: Date,
) -> TechniqueAdminDoc {
    let mut techniques = Vec::new();

    for result in results {
        let tier = result.visibility_tier();
        if tier == 0 {
            continue;
        }

        techniques.push(TechniqueEntry {
            technique_id: result.technique_id.clone(),
            technique_name: result.technique_name.clone(),
            detection: vec![DetectionScope {
                applicable_to: vec!["all".to_string()],
                location: vec![String::new()],
                comment: String::new(),
                score_logbook: vec![ScoreLogEntry {
                    date: None,
                    score: -1,
                    comment: String::new(),
                    auto_generated: false,
                }],
            }],
            visibility: vec![VisibilityScope {
                applicable_to: vec!["all".to_string()],
                comment: String::new(),
                score_logbook: vec![ScoreLogEntry {
                    date: Some(today),
                    score: i32::from(tier),
                    comment: String::new(),
                    auto_generated: true,
                }],
            }],
        });
    }

    TechniqueAdminDoc {
        version: TECHNIQUE_ADMINISTRATION_VERSION,
        file_type: FILE_TYPE_TECHNIQUE_ADMINISTRATION.to_string(),
        name: name.to_string(),
        platform: platform.to_string(),
        techniques,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::QualityAssessment;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn technique(id: &str, required: &[&str]) -> TechniqueRecord {
        TechniqueRecord {
            technique_id: id.to_string(),
            name: format!("technique {id}"),
            data_sources: required.iter().map(ToString::to_string).collect(),
            tactics: vec!["defense-evasion".to_string()],
            platforms: vec!["windows".to_string()],
        }
    }

    fn owned(names: &[&str]) -> BTreeMap<String, DataSource> {
        names
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    DataSource {
                        data_source_name: (*name).to_string(),
                        date_registered: None,
                        date_connected: None,
                        products: vec![format!("{name} product")],
                        available_for_data_analytics: true,
                        comment: String::new(),
                        data_quality: QualityAssessment {
                            device_completeness: 3,
                            data_field_completeness: 3,
                            timeliness: 3,
                            consistency: 3,
                            retention: 3,
                        },
                    },
                )
            })
            .collect()
    }

    #[test]
    fn visibility_tier_boundaries_are_closed_upper() {
        assert_eq!(visibility_tier(0.0), 0);
        assert_eq!(visibility_tier(1.0), 1);
        assert_eq!(visibility_tier(49.0), 1);
        assert_eq!(visibility_tier(50.0), 2);
        assert_eq!(visibility_tier(74.0), 2);
        assert_eq!(visibility_tier(75.0), 3);
        assert_eq!(visibility_tier(99.0), 3);
        assert_eq!(visibility_tier(100.0), 4);
    }

    #[test]
    fn two_of_three_required_sources_is_tier_two() {
        let techniques = vec![technique(
            "T0001",
            &["Process monitoring", "File monitoring", "Network traffic"],
        )];
        let results = score(
            &techniques,
            &owned(&["Process monitoring", "File monitoring"]),
            &BTreeSet::new(),
        );

        assert_eq!(results.len(), 1);
        assert!((results[0].percentage - 66.666_666).abs() < 0.001);
        assert_eq!(results[0].visibility_tier(), 2);
        assert_eq!(results[0].matched.len(), 2);
    }

    #[test]
    fn empty_required_list_excludes_the_technique() {
        let techniques = vec![technique("T0002", &[])];
        let results = score(&techniques, &owned(&["Process monitoring"]), &BTreeSet::new());
        assert!(results.is_empty());
    }

    #[test]
    fn exceptions_are_computed_but_suppressed() {
        let techniques = vec![
            technique("T0001", &["Process monitoring"]),
            technique("T0003", &["Process monitoring"]),
        ];
        let mut exceptions = BTreeSet::new();
        exceptions.insert("T0003".to_string());

        let results = score(&techniques, &owned(&["Process monitoring"]), &exceptions);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].technique_id, "T0001");
    }

    #[test]
    fn products_are_the_union_over_matched_sources() {
        let techniques = vec![technique(
            "T0001",
            &["Process monitoring", "File monitoring"],
        )];
        let results = score(
            &techniques,
            &owned(&["Process monitoring", "File monitoring"]),
            &BTreeSet::new(),
        );
        assert_eq!(results[0].products.len(), 2);
    }

    #[test]
    fn derived_document_skips_tier_zero_and_marks_heads_auto_generated() {
        let techniques = vec![
            technique("T0001", &["Process monitoring"]),
            technique("T0004", &["Network traffic"]),
        ];
        let results = score(&techniques, &owned(&["Process monitoring"]), &BTreeSet::new());
        let today = must_ok(crate::parse_iso_date("2024-05-01"));
        let doc = derive_admin_doc(&results, "unit", "windows", today);

        assert_eq!(doc.techniques.len(), 1);
        let entry = &doc.techniques[0];
        assert_eq!(entry.technique_id, "T0001");
        assert_eq!(entry.visibility[0].score_logbook[0].score, 4);
        assert!(entry.visibility[0].score_logbook[0].auto_generated);
        assert_eq!(entry.visibility[0].score_logbook[0].date, Some(today));
        assert_eq!(entry.detection[0].score_logbook[0].score, -1);
    }
}
