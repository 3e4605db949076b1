//! Domain logic for detection-coverage scoring and score-logbook
//! reconciliation.
//!
//! This crate is pure: it never touches the filesystem or the terminal.
//! Persistence lives in `sightline-store`, interactive prompting in
//! `sightline-cli`. The reconciler reaches the outside world only through
//! the [`reconcile::DecisionPort`] trait.

pub mod admin;
pub mod health;
pub mod logbook;
pub mod reconcile;
pub mod report;
pub mod scorer;
pub mod taxonomy;

use time::format_description::BorrowedFormatItem;
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SightlineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("reconcile error: {0}")]
    Reconcile(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("taxonomy error: {0}")]
    Taxonomy(String),
    #[error(
        "the platform in the derived score set ('{derived}') does not match \
         the platform in the persisted administration ('{persisted}'); \
         reconciliation canceled"
    )]
    PlatformMismatch { derived: String, persisted: String },
    #[error("decision input error: {0}")]
    Decision(String),
}

const ISO_DATE: &[BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

/// Parses a `YYYY-MM-DD` date literal.
///
/// # Errors
/// Returns [`SightlineError::Validation`] when the input is not a valid
/// calendar date in that format.
pub fn parse_iso_date(value: &str) -> Result<Date, SightlineError> {
    Date::parse(value, ISO_DATE)
        .map_err(|err| SightlineError::Validation(format!("invalid date '{value}': {err}")))
}

/// Formats a date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`SightlineError::Validation`] when formatting fails.
pub fn format_iso_date(value: Date) -> Result<String, SightlineError> {
    value
        .format(ISO_DATE)
        .map_err(|err| SightlineError::Validation(format!("failed to format date: {err}")))
}

/// Formats an optional date for display, with an empty string for `None`.
#[must_use]
pub fn display_date(value: Option<Date>) -> String {
    value
        .and_then(|date| format_iso_date(date).ok())
        .unwrap_or_default()
}

#[must_use]
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// `YYYY-MM-DD` (de)serialization for `Option<Date>` fields.
///
/// An absent, empty, or null scalar maps to `None`; everything else must be
/// a well-formed date literal.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use time::Date;

    /// # Errors
    /// Fails when the date cannot be rendered as `YYYY-MM-DD`.
    pub fn serialize<S: Serializer>(
        value: &Option<Date>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => super::format_iso_date(*date)
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Fails when a present scalar is not a well-formed date literal.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Date>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(text) if !text.trim().is_empty() => super::parse_iso_date(text.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
