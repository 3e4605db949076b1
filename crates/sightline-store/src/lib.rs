//! File-backed persistence for sightline: the YAML administration
//! documents, their backup/rewrite cycle, the taxonomy bundle behind the
//! lookup port, and the small on-disk caches.
//!
//! This crate owns every filesystem touch; `sightline-core` stays pure.

pub mod documents;
pub mod health_cache;
pub mod taxonomy;

pub use documents::{
    backup_file, fix_dates_and_nulls, load_data_source_admin, load_technique_admin,
    load_yaml_value, normalize_name, save_technique_admin, unique_output_path, write_output,
};
pub use health_cache::HealthStateCache;
pub use taxonomy::{BundleTaxonomy, TtlCache};
