//! Read-only lookup port for the external adversary-technique taxonomy.
//!
//! The taxonomy itself (retrieval, caching, on-disk format) lives behind
//! [`TaxonomyLookup`]; the scorer and the report projections only ever see
//! the typed records defined here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::SightlineError;

/// Source names whose `external_id` is authoritative for an object.
pub const EXTERNAL_ID_SOURCES: &[&str] =
    &["mitre-attack", "mitre-mobile-attack", "mitre-pre-attack"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Technique,
    Group,
    Software,
    Relationship,
    MitigationEnterprise,
    MitigationMobile,
    TechniqueByGroup,
    SoftwareByGroup,
    TechniqueBySoftware,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technique => "technique",
            Self::Group => "group",
            Self::Software => "software",
            Self::Relationship => "relationship",
            Self::MitigationEnterprise => "mitigation-enterprise",
            Self::MitigationMobile => "mitigation-mobile",
            Self::TechniqueByGroup => "technique-by-group",
            Self::SoftwareByGroup => "software-by-group",
            Self::TechniqueBySoftware => "technique-by-software",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "technique" => Some(Self::Technique),
            "group" => Some(Self::Group),
            "software" => Some(Self::Software),
            "relationship" => Some(Self::Relationship),
            "mitigation-enterprise" => Some(Self::MitigationEnterprise),
            "mitigation-mobile" => Some(Self::MitigationMobile),
            "technique-by-group" => Some(Self::TechniqueByGroup),
            "software-by-group" => Some(Self::SoftwareByGroup),
            "technique-by-software" => Some(Self::TechniqueBySoftware),
            _ => None,
        }
    }
}

/// One technique as the scorer consumes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TechniqueRecord {
    pub technique_id: String,
    pub name: String,
    /// Names of the data sources required to observe this technique.
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub tactics: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

impl TechniqueRecord {
    /// Platform applicability; the administration platform `all` matches
    /// every technique.
    #[must_use]
    pub fn applies_to_platform(&self, platform: &str) -> bool {
        if platform.eq_ignore_ascii_case("all") {
            return true;
        }
        self.platforms
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(platform))
    }
}

/// A generic taxonomy record, shared by every [`ObjectKind`].
///
/// Join kinds (`technique-by-group` and friends) set `related_id` to the
/// right-hand side of the pairing; relationship records carry the
/// relationship type in `object_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaxonomyObject {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub matrix: String,
    #[serde(default, with = "crate::iso_date")]
    pub created: Option<Date>,
    #[serde(default, with = "crate::iso_date")]
    pub modified: Option<Date>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub tactics: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub related_id: Option<String>,
}

/// Read-only lookup service for taxonomy records.
pub trait TaxonomyLookup {
    /// All techniques in the taxonomy.
    ///
    /// # Errors
    /// Returns [`SightlineError::Taxonomy`] when the backing source cannot
    /// be read or decoded.
    fn techniques(&self) -> Result<Vec<TechniqueRecord>, SightlineError>;

    /// All records of the requested kind.
    ///
    /// # Errors
    /// Returns [`SightlineError::Taxonomy`] when the backing source cannot
    /// be read or decoded.
    fn objects(&self, kind: ObjectKind) -> Result<Vec<TaxonomyObject>, SightlineError>;
}

/// The full data-source vocabulary used across the taxonomy, sorted.
#[must_use]
pub fn collect_data_sources(techniques: &[TechniqueRecord]) -> BTreeSet<String> {
    let mut sources = BTreeSet::new();
    for technique in techniques {
        for name in &technique.data_sources {
            sources.insert(name.clone());
        }
    }
    sources
}
