//! Helpers over score logbooks.
//!
//! Logbooks are append-only and deliberately NOT assumed to be sorted:
//! analysts insert entries by hand at arbitrary positions, so "latest" is
//! always resolved by a max-date scan, never by list position.

use time::Date;

use crate::admin::ScoreLogEntry;

/// The newest entry by date. Ties keep the earlier list position; entries
/// without a date sort before any dated entry.
#[must_use]
pub fn latest_entry(logbook: &[ScoreLogEntry]) -> Option<&ScoreLogEntry> {
    let mut newest: Option<&ScoreLogEntry> = None;
    for entry in logbook {
        match newest {
            Some(current) if entry.date <= current.date => {}
            _ => newest = Some(entry),
        }
    }
    newest
}

#[must_use]
pub fn latest_score(logbook: &[ScoreLogEntry]) -> Option<i32> {
    latest_entry(logbook).map(|entry| entry.score)
}

#[must_use]
pub fn latest_date(logbook: &[ScoreLogEntry]) -> Option<Date> {
    latest_entry(logbook).and_then(|entry| entry.date)
}

#[must_use]
pub fn latest_comment(logbook: &[ScoreLogEntry]) -> &str {
    latest_entry(logbook).map_or("", |entry| entry.comment.as_str())
}

#[must_use]
pub fn latest_auto_generated(logbook: &[ScoreLogEntry]) -> bool {
    latest_entry(logbook).is_some_and(|entry| entry.auto_generated)
}

/// Appends a new head entry, leaving every existing entry untouched and in
/// place. This is the only sanctioned mutation of a logbook.
pub fn insert_head(logbook: &mut Vec<ScoreLogEntry>, entry: ScoreLogEntry) {
    logbook.insert(0, entry);
}
