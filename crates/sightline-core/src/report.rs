//! Pure report projections: overlay layer documents, the scored
//! data-source matrix, the connected-source trend series and the
//! statistics tables. No merge logic lives here.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::admin::{quality_tier, DataSource};
use crate::scorer::CoverageResult;
use crate::taxonomy::{TaxonomyObject, TechniqueRecord};
use crate::{display_date, format_iso_date};

/// Color ramp shared by the coverage tiers and the quality tiers.
pub const COLOR_TIER_1: &str = "#ff6666";
pub const COLOR_TIER_2: &str = "#ffe766";
pub const COLOR_TIER_3: &str = "#8ec843";
pub const COLOR_TIER_4: &str = "#418b24";
pub const COLOR_TIER_5: &str = "#0f480f";

pub const COLOR_TACTIC_ROW_BACKGROUND: &str = "#dddddd";

const LAYER_VERSION: &str = "2.1";
const LAYER_DOMAIN: &str = "mitre-enterprise";

/// Color for a coverage percentage. Boundaries are closed-upper: exactly
/// 25 still falls in the lowest tier.
#[must_use]
pub fn coverage_color(percentage: f64) -> &'static str {
    if percentage <= 25.0 {
        COLOR_TIER_1
    } else if percentage <= 50.0 {
        COLOR_TIER_2
    } else if percentage <= 75.0 {
        COLOR_TIER_3
    } else if percentage <= 99.0 {
        COLOR_TIER_4
    } else {
        COLOR_TIER_5
    }
}

/// Color for a continuous quality score; `None` above the scale.
#[must_use]
pub fn quality_color(score: f64) -> Option<&'static str> {
    quality_tier(score).map(|tier| match tier {
        1 => COLOR_TIER_1,
        2 => COLOR_TIER_2,
        3 => COLOR_TIER_3,
        4 => COLOR_TIER_4,
        _ => COLOR_TIER_5,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LayerFilters {
    pub stages: Vec<String>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LegendItem {
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LayerMetadata {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LayerTechnique {
    #[serde(rename = "techniqueID")]
    pub technique_id: String,
    pub color: String,
    pub comment: String,
    pub enabled: bool,
    pub tactic: String,
    pub metadata: Vec<LayerMetadata>,
}

/// An overlay document loadable into a matrix navigator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LayerDocument {
    pub name: String,
    pub version: String,
    pub domain: String,
    pub description: String,
    pub filters: LayerFilters,
    pub sorting: u8,
    #[serde(rename = "viewMode")]
    pub view_mode: u8,
    #[serde(rename = "hideDisable")]
    pub hide_disable: bool,
    pub techniques: Vec<LayerTechnique>,
    #[serde(rename = "showTacticRowBackground")]
    pub show_tactic_row_background: bool,
    #[serde(rename = "tacticRowBackground")]
    pub tactic_row_background: String,
    #[serde(rename = "selectTechniquesAcrossTactics")]
    pub select_techniques_across_tactics: bool,
    #[serde(rename = "legendItems")]
    pub legend_items: Vec<LegendItem>,
}

fn expand_platforms(platform: &str) -> Vec<String> {
    if platform.eq_ignore_ascii_case("all") {
        vec!["windows".to_string(), "linux".to_string(), "mac".to_string()]
    } else {
        vec![platform.to_lowercase()]
    }
}

fn coverage_legend() -> Vec<LegendItem> {
    [
        ("1-25% of data sources available", COLOR_TIER_1),
        ("26-50% of data sources available", COLOR_TIER_2),
        ("51-75% of data sources available", COLOR_TIER_3),
        ("76-99% of data sources available", COLOR_TIER_4),
        ("100% of data sources available", COLOR_TIER_5),
    ]
    .into_iter()
    .map(|(label, color)| LegendItem {
        label: label.to_string(),
        color: color.to_string(),
    })
    .collect()
}

/// Builds the colorized technique overlay from scored coverage.
///
/// Fans out one row per (technique, tactic) pair: a technique active in
/// three tactics yields three rows carrying the same evidence metadata.
/// Techniques without a single matched data source are not drawn.
#[must_use]
pub fn coverage_layer(name: &str, platform: &str, results: &[CoverageResult]) -> LayerDocument {
    let mut techniques = Vec::new();

    for result in results {
        if result.matched.is_empty() {
            continue;
        }
        let color = coverage_color(result.percentage).to_string();
        let metadata = vec![
            LayerMetadata {
                name: "-Available data sources".to_string(),
                value: result.matched.join(", "),
            },
            LayerMetadata {
                name: "-Taxonomy data sources".to_string(),
                value: result.required.join(", "),
            },
            LayerMetadata {
                name: "-Products".to_string(),
                value: result
                    .products
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        ];

        for tactic in &result.tactics {
            techniques.push(LayerTechnique {
                technique_id: result.technique_id.clone(),
                color: color.clone(),
                comment: String::new(),
                enabled: true,
                tactic: tactic.to_lowercase().replace(' ', "-"),
                metadata: metadata.clone(),
            });
        }
    }

    LayerDocument {
        name: format!("Data sources {name}"),
        version: LAYER_VERSION.to_string(),
        domain: LAYER_DOMAIN.to_string(),
        description: String::new(),
        filters: LayerFilters {
            stages: vec!["act".to_string()],
            platforms: expand_platforms(platform),
        },
        sorting: 0,
        view_mode: 0,
        hide_disable: false,
        techniques,
        show_tactic_row_background: false,
        tactic_row_background: COLOR_TACTIC_ROW_BACKGROUND.to_string(),
        select_techniques_across_tactics: true,
        legend_items: coverage_legend(),
    }
}

/// One row of the scored data-source matrix.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MatrixRow {
    pub data_source: String,
    pub date_registered: String,
    pub date_connected: String,
    pub products: String,
    pub comment: String,
    pub available_for_data_analytics: String,
    pub device_completeness: String,
    pub data_field_completeness: String,
    pub timeliness: String,
    pub consistency: String,
    pub retention: String,
    pub score: String,
    pub color: String,
}

/// Builds the matrix over the full taxonomy vocabulary: one row per known
/// data source, filled in where the organization has registered it.
#[must_use]
pub fn matrix_rows(
    vocabulary: &BTreeSet<String>,
    owned: &BTreeMap<String, DataSource>,
) -> Vec<MatrixRow> {
    let mut rows = Vec::new();

    for name in vocabulary {
        let Some(source) = owned.get(name) else {
            rows.push(MatrixRow {
                data_source: name.clone(),
                date_registered: String::new(),
                date_connected: String::new(),
                products: String::new(),
                comment: String::new(),
                available_for_data_analytics: String::new(),
                device_completeness: String::new(),
                data_field_completeness: String::new(),
                timeliness: String::new(),
                consistency: String::new(),
                retention: String::new(),
                score: String::new(),
                color: String::new(),
            });
            continue;
        };

        let quality = &source.data_quality;
        let score = quality.weighted_score();
        let comment = source
            .comment
            .strip_suffix('\n')
            .unwrap_or(source.comment.as_str())
            .to_string();

        rows.push(MatrixRow {
            data_source: name.clone(),
            date_registered: display_date(source.date_registered),
            date_connected: display_date(source.date_connected),
            products: source.products.join(", "),
            comment,
            available_for_data_analytics: source.available_for_data_analytics.to_string(),
            device_completeness: quality.device_completeness.to_string(),
            data_field_completeness: quality.data_field_completeness.to_string(),
            timeliness: quality.timeliness.to_string(),
            consistency: quality.consistency.to_string(),
            retention: quality.retention.to_string(),
            score: format!("{score:.2}"),
            color: quality_color(score).unwrap_or_default().to_string(),
        });
    }

    rows
}

/// One month of the connected-data-source trend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrendPoint {
    /// `YYYY-MM`.
    pub month: String,
    /// Data sources connected in this month.
    pub count: u32,
    /// Running total up to and including this month.
    pub cumulative: u32,
}

/// Cumulative count of connected data sources over time. Sources without
/// a connection date do not contribute.
#[must_use]
pub fn trend_series<'a>(sources: impl IntoIterator<Item = &'a DataSource>) -> Vec<TrendPoint> {
    let mut per_month: BTreeMap<String, u32> = BTreeMap::new();
    for source in sources {
        let Some(connected) = source.date_connected else {
            continue;
        };
        let Ok(formatted) = format_iso_date(connected) else {
            continue;
        };
        let month = formatted[..7].to_string();
        *per_month.entry(month).or_insert(0) += 1;
    }

    let mut cumulative = 0;
    per_month
        .into_iter()
        .map(|(month, count)| {
            cumulative += count;
            TrendPoint {
                month,
                count,
                cumulative,
            }
        })
        .collect()
}

/// Technique count per taxonomy data source, most-covered first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DataSourceStat {
    pub data_source: String,
    pub technique_count: usize,
}

#[must_use]
pub fn data_source_statistics(techniques: &[TechniqueRecord]) -> Vec<DataSourceStat> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for technique in techniques {
        for name in &technique.data_sources {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
    }

    let mut stats: Vec<DataSourceStat> = counts
        .into_iter()
        .map(|(name, technique_count)| DataSourceStat {
            data_source: name.to_string(),
            technique_count,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.technique_count
            .cmp(&a.technique_count)
            .then_with(|| a.data_source.cmp(&b.data_source))
    });
    stats
}

/// Technique count per mitigation, most-used first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MitigationStat {
    pub mitigation_id: String,
    pub name: String,
    pub technique_count: usize,
}

#[must_use]
pub fn mitigation_statistics(
    mitigations: &[TaxonomyObject],
    relationships: &[TaxonomyObject],
) -> Vec<MitigationStat> {
    let names: BTreeMap<&str, &str> = mitigations
        .iter()
        .map(|m| (m.external_id.as_str(), m.name.as_str()))
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for relationship in relationships {
        if relationship.object_type != "mitigates" {
            continue;
        }
        if !names.contains_key(relationship.external_id.as_str()) {
            continue;
        }
        *counts.entry(relationship.external_id.as_str()).or_insert(0) += 1;
    }

    let mut stats: Vec<MitigationStat> = counts
        .into_iter()
        .map(|(id, technique_count)| MitigationStat {
            mitigation_id: id.to_string(),
            name: names.get(id).copied().unwrap_or_default().to_string(),
            technique_count,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.technique_count
            .cmp(&a.technique_count)
            .then_with(|| a.mitigation_id.cmp(&b.mitigation_id))
    });
    stats
}
