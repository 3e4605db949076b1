//! The taxonomy bundle adapter behind the core lookup port, plus the
//! wall-clock TTL cache that keeps parsed kinds on disk between runs.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use sightline_core::taxonomy::{
    ObjectKind, TaxonomyLookup, TaxonomyObject, TechniqueRecord, EXTERNAL_ID_SOURCES,
};
use sightline_core::SightlineError;

/// On-disk cache with wall-clock expiry.
///
/// Entries are JSON files keyed by name, stamped with their write time;
/// [`TtlCache::get_or_fetch`] returns the cached payload while it is
/// younger than the TTL and refetches otherwise. Cache write failures are
/// reported and swallowed; a cold cache is never an error.
pub struct TtlCache {
    dir: PathBuf,
    ttl: Duration,
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope<T> {
    written_at: String,
    payload: T,
}

impl TtlCache {
    #[must_use]
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    /// Returns the cached payload for `key` if fresh, otherwise runs
    /// `fetch` and caches its result.
    ///
    /// # Errors
    /// Propagates only `fetch` errors; a missing, stale, or unreadable
    /// cache entry just triggers a refetch.
    pub fn get_or_fetch<T, F>(&self, key: &str, fetch: F) -> Result<T, SightlineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, SightlineError>,
    {
        if let Some(payload) = self.read_fresh(key) {
            debug!(key, "taxonomy cache hit");
            return Ok(payload);
        }

        let payload = fetch()?;
        self.write(key, &payload);
        Ok(payload)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let body = fs::read_to_string(self.entry_path(key)).ok()?;
        let envelope: CacheEnvelope<T> = serde_json::from_str(&body).ok()?;
        let written_at = OffsetDateTime::parse(&envelope.written_at, &Rfc3339).ok()?;
        let age = OffsetDateTime::now_utc() - written_at;
        if age < self.ttl {
            Some(envelope.payload)
        } else {
            None
        }
    }

    fn write<T: Serialize>(&self, key: &str, payload: &T) {
        let written_at = match OffsetDateTime::now_utc().format(&Rfc3339) {
            Ok(stamp) => stamp,
            Err(err) => {
                warn!(key, error = %err, "failed to stamp taxonomy cache entry");
                return;
            }
        };
        let envelope = CacheEnvelope {
            written_at,
            payload,
        };
        let serialized = match serde_json::to_string(&envelope) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(key, error = %err, "failed to serialize taxonomy cache entry");
                return;
            }
        };
        if let Err(err) = fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(self.entry_path(key), serialized))
        {
            warn!(key, error = %err, "failed to write taxonomy cache entry");
        }
    }
}

/// Lookup adapter over a STIX-flavored JSON bundle on disk.
///
/// The three join kinds (`technique-by-group`, `software-by-group`,
/// `technique-by-software`) are computed from `uses` relationships; every
/// external ID resolves through the fixed source-name allowlist.
pub struct BundleTaxonomy {
    bundle_path: PathBuf,
    cache: Option<TtlCache>,
}

impl BundleTaxonomy {
    #[must_use]
    pub fn new(bundle_path: PathBuf) -> Self {
        Self {
            bundle_path,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(bundle_path: PathBuf, cache: TtlCache) -> Self {
        Self {
            bundle_path,
            cache: Some(cache),
        }
    }

    fn raw_objects(&self) -> Result<Vec<Value>, SightlineError> {
        let body = fs::read_to_string(&self.bundle_path).map_err(|err| {
            SightlineError::Taxonomy(format!(
                "failed to read taxonomy bundle {}: {err}",
                self.bundle_path.display()
            ))
        })?;
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            SightlineError::Taxonomy(format!(
                "taxonomy bundle {} is not valid JSON: {err}",
                self.bundle_path.display()
            ))
        })?;

        let objects = match parsed {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("objects") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SightlineError::Taxonomy(format!(
                        "taxonomy bundle {} has no 'objects' list",
                        self.bundle_path.display()
                    )))
                }
            },
            _ => {
                return Err(SightlineError::Taxonomy(format!(
                    "taxonomy bundle {} has an unexpected top-level shape",
                    self.bundle_path.display()
                )))
            }
        };
        Ok(objects)
    }

    fn fetch(&self, kind: ObjectKind) -> Result<Vec<TaxonomyObject>, SightlineError> {
        let raw = self.raw_objects()?;
        let objects = match kind {
            ObjectKind::Technique => map_of_types(&raw, &["attack-pattern"]),
            ObjectKind::Group => map_of_types(&raw, &["intrusion-set"]),
            ObjectKind::Software => map_of_types(&raw, &["malware", "tool"]),
            ObjectKind::MitigationEnterprise => mitigations(&raw, "mitre-attack"),
            ObjectKind::MitigationMobile => mitigations(&raw, "mitre-mobile-attack"),
            ObjectKind::Relationship => relationships(&raw),
            ObjectKind::TechniqueByGroup => {
                join_by_group(&raw, "intrusion-set", "attack-pattern--")
            }
            ObjectKind::SoftwareByGroup => join_software_by_group(&raw),
            ObjectKind::TechniqueBySoftware => join_technique_by_software(&raw),
        };
        debug!(kind = kind.as_str(), count = objects.len(), "taxonomy kind loaded");
        Ok(objects)
    }
}

impl TaxonomyLookup for BundleTaxonomy {
    fn techniques(&self) -> Result<Vec<TechniqueRecord>, SightlineError> {
        Ok(self
            .objects(ObjectKind::Technique)?
            .into_iter()
            .map(|object| TechniqueRecord {
                technique_id: object.external_id,
                name: object.name,
                data_sources: object.data_sources,
                tactics: object.tactics,
                platforms: object.platforms,
            })
            .collect())
    }

    fn objects(&self, kind: ObjectKind) -> Result<Vec<TaxonomyObject>, SightlineError> {
        match &self.cache {
            Some(cache) => cache.get_or_fetch(kind.as_str(), || self.fetch(kind)),
            None => self.fetch(kind),
        }
    }
}

fn string_of(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(raw: &Value, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn external_id_of(raw: &Value) -> Option<String> {
    let references = raw.get("external_references")?.as_array()?;
    for reference in references {
        let source = reference.get("source_name").and_then(Value::as_str);
        if source.is_some_and(|source| EXTERNAL_ID_SOURCES.contains(&source)) {
            return reference
                .get("external_id")
                .and_then(Value::as_str)
                .map(ToString::to_string);
        }
    }
    None
}

fn matrix_of(raw: &Value) -> String {
    raw.get("external_references")
        .and_then(Value::as_array)
        .and_then(|refs| refs.first())
        .map(|first| string_of(first, "source_name"))
        .unwrap_or_default()
}

fn date_of(raw: &Value, key: &str) -> Option<time::Date> {
    let text = raw.get(key)?.as_str()?;
    if let Ok(stamp) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(stamp.date());
    }
    sightline_core::parse_iso_date(text).ok()
}

fn tactics_of(raw: &Value) -> Vec<String> {
    raw.get("kill_chain_phases")
        .and_then(Value::as_array)
        .map(|phases| {
            phases
                .iter()
                .map(|phase| string_of(phase, "phase_name"))
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn to_object(raw: &Value) -> Option<TaxonomyObject> {
    Some(TaxonomyObject {
        external_id: external_id_of(raw)?,
        name: string_of(raw, "name"),
        object_type: string_of(raw, "type"),
        matrix: matrix_of(raw),
        created: date_of(raw, "created"),
        modified: date_of(raw, "modified"),
        platforms: string_list(raw, "x_mitre_platforms"),
        tactics: tactics_of(raw),
        data_sources: string_list(raw, "x_mitre_data_sources"),
        aliases: string_list(raw, "aliases"),
        related_id: None,
    })
}

fn is_of_type(raw: &Value, types: &[&str]) -> bool {
    raw.get("type")
        .and_then(Value::as_str)
        .is_some_and(|found| types.contains(&found))
}

fn map_of_types(raw: &[Value], types: &[&str]) -> Vec<TaxonomyObject> {
    raw.iter()
        .filter(|object| is_of_type(object, types))
        .filter_map(to_object)
        .collect()
}

fn mitigations(raw: &[Value], matrix: &str) -> Vec<TaxonomyObject> {
    map_of_types(raw, &["course-of-action"])
        .into_iter()
        .filter(|object| object.matrix == matrix && object.external_id.starts_with('M'))
        .collect()
}

/// Resolves a STIX internal id (`attack-pattern--<uuid>`) to the object.
fn by_stix_id<'a>(raw: &'a [Value], stix_id: &str) -> Option<&'a Value> {
    raw.iter()
        .find(|object| object.get("id").and_then(Value::as_str) == Some(stix_id))
}

fn relationships(raw: &[Value]) -> Vec<TaxonomyObject> {
    let mut resolved = Vec::new();
    for relationship in raw.iter().filter(|object| is_of_type(object, &["relationship"])) {
        let source_ref = string_of(relationship, "source_ref");
        let target_ref = string_of(relationship, "target_ref");
        let Some(source_id) = by_stix_id(raw, &source_ref).and_then(external_id_of) else {
            continue;
        };
        let Some(target_id) = by_stix_id(raw, &target_ref).and_then(external_id_of) else {
            continue;
        };
        resolved.push(TaxonomyObject {
            external_id: source_id,
            object_type: string_of(relationship, "relationship_type"),
            related_id: Some(target_id),
            ..TaxonomyObject::default()
        });
    }
    resolved
}

fn uses_relationships<'a>(
    raw: &'a [Value],
    source_type: &str,
    target_prefix: &str,
) -> Vec<(&'a Value, &'a Value)> {
    let mut pairs = Vec::new();
    for relationship in raw.iter().filter(|object| is_of_type(object, &["relationship"])) {
        if string_of(relationship, "relationship_type") != "uses" {
            continue;
        }
        let source_ref = string_of(relationship, "source_ref");
        let target_ref = string_of(relationship, "target_ref");
        if !target_ref.starts_with(target_prefix) {
            continue;
        }
        let Some(source) = by_stix_id(raw, &source_ref) else {
            continue;
        };
        if !is_of_type(source, &[source_type]) {
            continue;
        }
        let Some(target) = by_stix_id(raw, &target_ref) else {
            continue;
        };
        pairs.push((source, target));
    }
    pairs
}

fn join_by_group(raw: &[Value], source_type: &str, target_prefix: &str) -> Vec<TaxonomyObject> {
    uses_relationships(raw, source_type, target_prefix)
        .into_iter()
        .filter_map(|(group, technique)| {
            Some(TaxonomyObject {
                external_id: external_id_of(group)?,
                name: string_of(group, "name"),
                object_type: string_of(group, "type"),
                matrix: matrix_of(technique),
                platforms: string_list(technique, "x_mitre_platforms"),
                aliases: string_list(group, "aliases"),
                related_id: Some(external_id_of(technique)?),
                ..TaxonomyObject::default()
            })
        })
        .collect()
}

fn join_software_by_group(raw: &[Value]) -> Vec<TaxonomyObject> {
    let mut joined = join_by_group(raw, "intrusion-set", "malware--");
    joined.extend(join_by_group(raw, "intrusion-set", "tool--"));
    joined
}

fn join_technique_by_software(raw: &[Value]) -> Vec<TaxonomyObject> {
    let mut joined = Vec::new();
    for source_type in ["malware", "tool"] {
        joined.extend(join_by_group(raw, source_type, "attack-pattern--"));
    }
    joined
}
