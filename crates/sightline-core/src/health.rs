//! Advisory structural validation of the technique administration.
//!
//! Runs over the loosely parsed document rather than the typed model so
//! that missing keys and wrong scalar types can be reported instead of
//! failing the parse. Findings never block reconciliation or writes.

use std::collections::BTreeSet;

use serde_yaml::Value;

/// One advisory finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthIssue {
    pub technique_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Detection,
    Visibility,
}

impl ScopeKind {
    fn key(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Visibility => "visibility",
        }
    }

    fn score_range(self) -> (i64, i64) {
        let (min, max) = match self {
            Self::Detection => crate::admin::DETECTION_SCORE_RANGE,
            Self::Visibility => crate::admin::VISIBILITY_SCORE_RANGE,
        };
        (i64::from(min), i64::from(max))
    }
}

/// Labels closer than this (but not identical) are flagged as probable
/// typos of one another.
const APPLICABLE_TO_SIMILARITY: f64 = 0.8;

/// Checks one technique administration document and returns every finding.
#[must_use]
pub fn check_technique_admin(doc: &Value) -> Vec<HealthIssue> {
    let mut issues = Vec::new();

    let Some(techniques) = doc.get("techniques").and_then(Value::as_sequence) else {
        issues.push(HealthIssue {
            technique_id: None,
            message: "document is MISSING the 'techniques' list".to_string(),
        });
        return issues;
    };

    let mut seen_ids: BTreeSet<String> = BTreeSet::new();
    let mut all_applicable_to: BTreeSet<String> = BTreeSet::new();

    for tech in techniques {
        let tech_id = tech
            .get("technique_id")
            .and_then(Value::as_str)
            .unwrap_or("<missing technique_id>")
            .to_string();

        if !seen_ids.insert(tech_id.clone()) {
            issues.push(issue(&tech_id, format!("duplicate technique ID: {tech_id}")));
        }
        if !is_valid_technique_id(&tech_id) {
            issues.push(issue(&tech_id, format!("invalid technique ID: {tech_id}")));
        }

        for kind in [ScopeKind::Detection, ScopeKind::Visibility] {
            match tech.get(kind.key()) {
                None => issues.push(issue(
                    &tech_id,
                    format!("technique ID {tech_id} is MISSING {}", kind.key()),
                )),
                Some(value) => {
                    for scope in scopes_of(value) {
                        check_scope(scope, kind, &tech_id, &mut issues);
                        collect_applicable_to(scope, &mut all_applicable_to);
                    }
                }
            }
        }
    }

    check_similar_labels(&all_applicable_to, &mut issues);
    issues
}

fn issue(tech_id: &str, message: String) -> HealthIssue {
    HealthIssue {
        technique_id: Some(tech_id.to_string()),
        message,
    }
}

/// A scope value may be written as a single mapping or a list of mappings.
fn scopes_of(value: &Value) -> Vec<&Value> {
    match value {
        Value::Sequence(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn collect_applicable_to(scope: &Value, labels: &mut BTreeSet<String>) {
    if let Some(items) = scope.get("applicable_to").and_then(Value::as_sequence) {
        for item in items {
            if let Some(label) = item.as_str() {
                labels.insert(label.to_string());
            }
        }
    }
}

fn check_scope(scope: &Value, kind: ScopeKind, tech_id: &str, issues: &mut Vec<HealthIssue>) {
    let object_type = kind.key();

    let mut required = vec!["applicable_to", "comment", "score_logbook"];
    if kind == ScopeKind::Detection {
        required.push("location");
    }
    for key in required {
        if scope.get(key).is_none() {
            issues.push(issue(
                tech_id,
                format!(
                    "technique ID {tech_id} is MISSING a key-value pair in {object_type}: {key}"
                ),
            ));
        }
    }

    let list_keys: &[&str] = match kind {
        ScopeKind::Detection => &["applicable_to", "location"],
        ScopeKind::Visibility => &["applicable_to"],
    };
    for key in list_keys {
        match scope.get(key) {
            None => {}
            Some(Value::Sequence(items)) => {
                if items.first().is_none_or(Value::is_null) {
                    issues.push(issue(
                        tech_id,
                        format!(
                            "technique ID {tech_id} has an EMPTY key-value pair in \
                             {object_type}: {key}"
                        ),
                    ));
                }
            }
            Some(_) => issues.push(issue(
                tech_id,
                format!(
                    "technique ID {tech_id} has for '{key}' in {object_type} a scalar value \
                     assigned (should be a list)"
                ),
            )),
        }
    }

    let Some(logbook) = scope.get("score_logbook") else {
        return;
    };
    for entry in scopes_of(logbook) {
        check_score_entry(entry, kind, tech_id, issues);
    }
}

fn check_score_entry(entry: &Value, kind: ScopeKind, tech_id: &str, issues: &mut Vec<HealthIssue>) {
    let object_type = kind.key();
    let (min_score, max_score) = kind.score_range();

    for key in ["date", "score", "comment"] {
        if entry.get(key).is_none() {
            issues.push(issue(
                tech_id,
                format!(
                    "technique ID {tech_id} is MISSING a key-value pair in a {object_type} \
                     score object in the score_logbook: {key}"
                ),
            ));
        }
    }

    if let Some(auto) = entry.get("auto_generated") {
        if !auto.is_bool() {
            issues.push(issue(
                tech_id,
                format!(
                    "technique ID {tech_id} has an INVALID auto_generated value in a \
                     {object_type} score object: should be true or false"
                ),
            ));
        }
    }

    let score = match entry.get("score") {
        Some(value) if value.is_null() => {
            issues.push(issue(
                tech_id,
                format!(
                    "technique ID {tech_id} has an EMPTY key-value pair in a {object_type} \
                     score object in the score_logbook: score"
                ),
            ));
            return;
        }
        Some(value) => match value.as_i64() {
            Some(score) => score,
            None => {
                issues.push(issue(
                    tech_id,
                    format!(
                        "technique ID {tech_id} has an INVALID score format in a \
                         {object_type} score object: score should be an integer"
                    ),
                ));
                return;
            }
        },
        None => return,
    };

    if score < min_score || score > max_score {
        issues.push(issue(
            tech_id,
            format!(
                "technique ID {tech_id} has an INVALID {object_type} score in the \
                 score_logbook: {score} (should be between {min_score} and {max_score})"
            ),
        ));
    }

    match entry.get("date") {
        Some(value) if value.is_null() => {
            if score > -1 {
                issues.push(issue(
                    tech_id,
                    format!(
                        "technique ID {tech_id} has an EMPTY key-value pair in a \
                         {object_type} score object in the score_logbook: date"
                    ),
                ));
            }
        }
        Some(value) => {
            if score > min_score {
                let well_formed = value
                    .as_str()
                    .is_some_and(|text| crate::parse_iso_date(text.trim()).is_ok());
                if !well_formed {
                    issues.push(issue(
                        tech_id,
                        format!(
                            "technique ID {tech_id} has an INVALID date format in a \
                             {object_type} score object: date should be YYYY-MM-DD"
                        ),
                    ));
                }
            }
        }
        None => {}
    }
}

fn check_similar_labels(labels: &BTreeSet<String>, issues: &mut Vec<HealthIssue>) {
    let mut similar: BTreeSet<&str> = BTreeSet::new();
    for left in labels {
        for right in labels {
            let ratio = strsim::normalized_levenshtein(left, right);
            if ratio > APPLICABLE_TO_SIMILARITY && (ratio - 1.0).abs() > f64::EPSILON {
                similar.insert(left);
                similar.insert(right);
            }
        }
    }

    for label in similar {
        issues.push(HealthIssue {
            technique_id: None,
            message: format!(
                "applicable_to value '{label}' is very similar to another label; \
                 correct where necessary"
            ),
        });
    }
}

fn is_valid_technique_id(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('T') else {
        return false;
    };
    let (base, sub) = match rest.split_once('.') {
        Some((base, sub)) => (base, Some(sub)),
        None => (rest, None),
    };
    let all_digits = |text: &str| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());
    base.len() == 4
        && all_digits(base)
        && sub.is_none_or(|text| text.len() == 3 && all_digits(text))
}
