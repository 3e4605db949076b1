//! Loading, verifying and rewriting the YAML administration documents.
//!
//! Writes follow the backup-before-overwrite contract: the previous store
//! content is always recoverable from a dated backup copy. Serialized
//! output goes through a small fixup pass that strips the quotes around
//! the run date and blanks `null` value tokens, so rewritten files keep
//! the hand-edited look of the originals.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use time::Date;
use tracing::debug;

use sightline_core::admin::{
    DataSourceAdminDoc, TechniqueAdminDoc, FILE_TYPE_DATA_SOURCE_ADMINISTRATION,
    FILE_TYPE_TECHNIQUE_ADMINISTRATION,
};
use sightline_core::format_iso_date;

/// Reads a YAML file into a loose value, for health validation and
/// file-type verification.
///
/// # Errors
/// Fails when the file cannot be read or is not YAML at all.
pub fn load_yaml_value(path: &Path) -> Result<serde_yaml::Value> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&body)
        .with_context(|| format!("{} is not a valid YAML file", path.display()))
}

fn verify_file_type(value: &serde_yaml::Value, expected: &str, path: &Path) -> Result<()> {
    if value.as_mapping().is_none() {
        bail!(
            "{} is not a valid administration file (no key-value pairs):\n{}",
            path.display(),
            render_for_diagnosis(value)
        );
    }

    match value.get("file_type").and_then(serde_yaml::Value::as_str) {
        None => bail!(
            "{} does not contain a file_type key:\n{}",
            path.display(),
            render_for_diagnosis(value)
        ),
        Some(found) if found != expected => bail!(
            "{} is not a file type of '{expected}' (found '{found}')",
            path.display()
        ),
        Some(_) => Ok(()),
    }
}

/// The offending parsed content, rendered for the operator.
fn render_for_diagnosis(value: &serde_yaml::Value) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|_| "<unrenderable document>".to_string())
}

/// Loads and verifies the data-source administration.
///
/// # Errors
/// Fails on unreadable files, wrong `file_type`, or documents missing
/// required keys; the error message carries the parsed content so the
/// operator can see what was actually read.
pub fn load_data_source_admin(path: &Path) -> Result<DataSourceAdminDoc> {
    let value = load_yaml_value(path)?;
    verify_file_type(&value, FILE_TYPE_DATA_SOURCE_ADMINISTRATION, path)?;
    serde_yaml::from_value(value.clone()).with_context(|| {
        format!(
            "{} is missing required data-source administration content:\n{}",
            path.display(),
            render_for_diagnosis(&value)
        )
    })
}

/// Loads and verifies the technique administration.
///
/// # Errors
/// Same contract as [`load_data_source_admin`].
pub fn load_technique_admin(path: &Path) -> Result<TechniqueAdminDoc> {
    let value = load_yaml_value(path)?;
    verify_file_type(&value, FILE_TYPE_TECHNIQUE_ADMINISTRATION, path)?;
    serde_yaml::from_value(value.clone()).with_context(|| {
        format!(
            "{} is missing required technique administration content:\n{}",
            path.display(),
            render_for_diagnosis(&value)
        )
    })
}

/// Serializes the technique administration with the output fixups applied.
///
/// # Errors
/// Fails when serialization or the date formatting fails.
pub fn render_technique_admin(doc: &TechniqueAdminDoc, run_date: Date) -> Result<String> {
    let yaml = serde_yaml::to_string(doc).context("failed to serialize administration")?;
    let date_literal =
        format_iso_date(run_date).map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(fix_dates_and_nulls(&yaml, &date_literal))
}

/// Writes the technique administration in place. Call [`backup_file`]
/// first; overwriting without a backup breaks the durability contract.
///
/// # Errors
/// Fails when rendering or the write fails.
pub fn save_technique_admin(path: &Path, doc: &TechniqueAdminDoc, run_date: Date) -> Result<()> {
    let rendered = render_technique_admin(doc, run_date)?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "administration written");
    Ok(())
}

/// Strips the quotes around `run_date` on date lines and blanks `null`
/// value tokens. Only whole-value tokens are touched; comments and data
/// containing the word "null" are left alone.
#[must_use]
pub fn fix_dates_and_nulls(text: &str, run_date: &str) -> String {
    let date_line = Regex::new(&format!(
        r"(?m)^(\s*(?:- )?date:)\s*'{run_date}'\s*$"
    ));
    let null_value = Regex::new(r"(?m)^(\s*(?:- )?[A-Za-z_][A-Za-z0-9_]*:)\s*null\s*$");
    let null_item = Regex::new(r"(?m)^(\s*-)\s*null\s*$");

    let mut fixed = text.to_string();
    if let Ok(pattern) = date_line {
        fixed = pattern
            .replace_all(&fixed, format!("$1 {run_date}"))
            .into_owned();
    }
    if let Ok(pattern) = null_value {
        fixed = pattern.replace_all(&fixed, "$1").into_owned();
    }
    if let Ok(pattern) = null_item {
        fixed = pattern.replace_all(&fixed, "$1").into_owned();
    }
    fixed
}

/// Copies the store to a dated backup next to it and returns the backup
/// path. Collisions get a numeric suffix; existing backups are never
/// overwritten.
///
/// # Errors
/// Fails when the copy fails; the caller must not rewrite the store in
/// that case.
pub fn backup_file(path: &Path, today: Date) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("administration");
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("yaml");
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let date_literal = format_iso_date(today).map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let mut backup = parent.join(format!("{stem}_backup_{date_literal}.{extension}"));
    let mut suffix = 1;
    while backup.exists() {
        backup = parent.join(format!("{stem}_backup_{date_literal}_{suffix}.{extension}"));
        suffix += 1;
    }

    fs::copy(path, &backup)
        .with_context(|| format!("failed to back up {} to {}", path.display(), backup.display()))?;
    Ok(backup)
}

/// Lowercases a display name and replaces spaces with dashes for use in
/// filenames.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// First free path of the form `stem.ext`, `stem_1.ext`, `stem_2.ext`, …
#[must_use]
pub fn unique_output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut suffix = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{suffix}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

/// Writes `content` to a non-clobbering file under `dir` and returns the
/// path written.
///
/// # Errors
/// Fails when the directory cannot be created or the write fails.
pub fn write_output(dir: &Path, stem: &str, extension: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let path = unique_output_path(dir, stem, extension);
    fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::admin::{
        ScoreLogEntry, TechniqueEntry, VisibilityScope, TECHNIQUE_ADMINISTRATION_VERSION,
    };
    use sightline_core::parse_iso_date;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn sample_doc() -> TechniqueAdminDoc {
        TechniqueAdminDoc {
            version: TECHNIQUE_ADMINISTRATION_VERSION,
            file_type: FILE_TYPE_TECHNIQUE_ADMINISTRATION.to_string(),
            name: "unit".to_string(),
            platform: "windows".to_string(),
            techniques: vec![TechniqueEntry {
                technique_id: "T1003".to_string(),
                technique_name: "Credential Dumping".to_string(),
                detection: Vec::new(),
                visibility: vec![VisibilityScope {
                    applicable_to: vec!["all".to_string()],
                    comment: String::new(),
                    score_logbook: vec![ScoreLogEntry {
                        date: Some(must_ok(parse_iso_date("2024-05-01"))),
                        score: 3,
                        comment: String::new(),
                        auto_generated: true,
                    }],
                }],
            }],
        }
    }

    #[test]
    fn technique_admin_round_trips_through_disk() {
        let dir = must_ok(tempfile::tempdir());
        let path = dir.path().join("techniques.yaml");
        let doc = sample_doc();
        must_ok(save_technique_admin(
            &path,
            &doc,
            must_ok(parse_iso_date("2024-05-01")),
        ));

        let loaded = must_ok(load_technique_admin(&path));
        assert_eq!(loaded, doc);
    }

    #[test]
    fn wrong_file_type_is_rejected_with_the_parsed_content() {
        let dir = must_ok(tempfile::tempdir());
        let path = dir.path().join("wrong.yaml");
        must_ok(fs::write(&path, "file_type: grocery-list\nname: x\n"));

        let result = load_technique_admin(&path);
        let message = match result {
            Ok(_) => panic!("expected load to fail"),
            Err(err) => format!("{err:#}"),
        };
        assert!(message.contains("technique-administration"));
        assert!(message.contains("grocery-list"));
    }

    #[test]
    fn missing_file_type_reports_the_document_body() {
        let dir = must_ok(tempfile::tempdir());
        let path = dir.path().join("bare.yaml");
        must_ok(fs::write(&path, "name: orphan\nplatform: windows\n"));

        let result = load_data_source_admin(&path);
        let message = match result {
            Ok(_) => panic!("expected load to fail"),
            Err(err) => format!("{err:#}"),
        };
        assert!(message.contains("file_type"));
        assert!(message.contains("orphan"));
    }

    #[test]
    fn fixups_touch_only_the_affected_lines() {
        let raw = concat!(
            "date_connected: null\n",
            "comment: contains the word null inside\n",
            "score_logbook:\n",
            "- date: '2024-05-01'\n",
            "  score: 3\n",
            "- null\n",
            "other_date: '2023-01-01'\n",
        );
        let fixed = fix_dates_and_nulls(raw, "2024-05-01");
        assert!(fixed.contains("date_connected:\n"));
        assert!(fixed.contains("comment: contains the word null inside"));
        assert!(fixed.contains("- date: 2024-05-01\n"));
        assert!(fixed.contains("-\n"));
        // A different date literal keeps its quotes.
        assert!(fixed.contains("other_date: '2023-01-01'"));
    }

    #[test]
    fn backups_never_overwrite_each_other() {
        let dir = must_ok(tempfile::tempdir());
        let path = dir.path().join("techniques.yaml");
        must_ok(fs::write(&path, "file_type: technique-administration\n"));

        let today = must_ok(parse_iso_date("2024-05-01"));
        let first = must_ok(backup_file(&path, today));
        let second = must_ok(backup_file(&path, today));

        assert!(first.exists());
        assert!(second.exists());
        assert_ne!(first, second);
        assert!(first
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("_backup_2024-05-01")));
    }

    #[test]
    fn output_paths_get_numeric_suffixes() {
        let dir = must_ok(tempfile::tempdir());
        let first = must_ok(write_output(dir.path(), "layer", "json", "{}"));
        let second = must_ok(write_output(dir.path(), "layer", "json", "{}"));
        assert!(first.ends_with("layer.json"));
        assert!(second.ends_with("layer_1.json"));
    }

    #[test]
    fn normalize_name_lowercases_and_dashes() {
        assert_eq!(normalize_name("Acme Corp Windows"), "acme-corp-windows");
    }
}
