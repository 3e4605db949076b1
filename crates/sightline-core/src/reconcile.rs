//! Score reconciliation: merging freshly derived visibility scores into the
//! persisted, human-maintained technique administration.
//!
//! The merge never overwrites history. Every accepted change is a new head
//! entry in the affected score logbook; prior entries keep their content
//! and position. Ambiguous cases go through [`DecisionPort`], an explicit
//! request/response boundary, so the whole state machine runs without a
//! terminal.

use std::collections::BTreeMap;

use serde::Serialize;
use time::Date;

use crate::admin::{ScoreLogEntry, TechniqueAdminDoc, TechniqueEntry, VisibilityScope};
use crate::logbook;
use crate::SightlineError;

/// How persisted visibility scopes are paired with the derived score.
///
/// `Positional` preserves the historical behavior: every scope of a
/// technique, walked by list index, is measured against the technique's
/// single derived entry. If scope ordering ever differs between runs,
/// scores land on the wrong scope. `ByLabel` instead pairs only scopes
/// whose `applicable_to` labels equal the derived scope's labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Positional,
    ByLabel,
}

impl MatchStrategy {
    fn pairs(self, scope: &VisibilityScope, derived_labels: &[String]) -> bool {
        match self {
            Self::Positional => true,
            Self::ByLabel => scope.applicable_to == derived_labels,
        }
    }
}

/// Run-level provenance of the candidate set: whether the latest entries
/// being replaced were all hand-entered, all auto-generated, or a mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    AllManual,
    AllAuto,
    Mixed,
}

impl Provenance {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllManual => "all-manual",
            Self::AllAuto => "all-auto",
            Self::Mixed => "mixed",
        }
    }
}

/// The update policy chosen once per run and applied uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Insert every candidate's new entry without prompting.
    ApplyAll,
    /// Show old-vs-new for every candidate and ask per candidate.
    ReviewEach,
    /// Update auto-generated candidates; leave manual ones untouched.
    AutoOnly,
    /// Update auto-generated candidates; review manual ones individually.
    AutoPlusReview,
    /// Abort the entire reconciliation without writing anything.
    Cancel,
}

impl UpdateStrategy {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ApplyAll => "Apply all new scores automatically",
            Self::ReviewEach => "Review every changed score individually",
            Self::AutoOnly => "Apply new scores for auto-generated entries only",
            Self::AutoPlusReview => {
                "Apply auto-generated entries automatically and review manual ones"
            }
            Self::Cancel => "Cancel the update",
        }
    }
}

/// Everything a reviewer needs to judge one pending update.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CandidateView {
    pub technique_id: String,
    pub technique_name: String,
    pub applicable_to: Vec<String>,
    pub scope_comment: String,
    pub old_date: Option<Date>,
    pub old_score: Option<i32>,
    pub old_comment: String,
    pub new_date: Option<Date>,
    pub new_score: i32,
    pub new_comment: String,
}

/// Decision boundary between the reconciler and whoever answers for it
/// (an interactive console in production, a script in tests).
pub trait DecisionPort {
    /// One batch comment for all techniques newly added this run, or
    /// `None` to leave the comments empty.
    ///
    /// # Errors
    /// Returns [`SightlineError::Decision`] when the answer cannot be
    /// obtained.
    fn addition_comment(
        &mut self,
        technique_ids: &[String],
    ) -> Result<Option<String>, SightlineError>;

    /// Picks one of `options` for the whole run.
    ///
    /// # Errors
    /// Returns [`SightlineError::Decision`] when the answer cannot be
    /// obtained.
    fn select_strategy(
        &mut self,
        provenance: Provenance,
        eligible: usize,
        options: &[UpdateStrategy],
    ) -> Result<UpdateStrategy, SightlineError>;

    /// Yes/no verdict for one candidate under individual review.
    ///
    /// # Errors
    /// Returns [`SightlineError::Decision`] when the answer cannot be
    /// obtained.
    fn review_update(
        &mut self,
        view: &CandidateView,
        remaining: usize,
    ) -> Result<bool, SightlineError>;
}

/// One applied head insertion.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub technique_id: String,
    pub applicable_to: Vec<String>,
}

/// The result of one reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// The (possibly updated) administration document. Only meaningful to
    /// persist when `changed()` is true and the run was not cancelled.
    pub document: TechniqueAdminDoc,
    /// Technique IDs newly added this run.
    pub added: Vec<String>,
    pub updated: Vec<AppliedUpdate>,
    /// Number of scopes whose latest score differed from the derived one.
    pub eligible: usize,
    pub cancelled: bool,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.cancelled && (!self.added.is_empty() || !self.updated.is_empty())
    }
}

struct Proposal {
    entry: ScoreLogEntry,
    labels: Vec<String>,
}

struct Candidate {
    tech_index: usize,
    scope_index: usize,
    auto: bool,
}

enum Action {
    Auto,
    Review,
    Skip,
}

/// Merges `derived` into `persisted` under the chosen matching strategy.
///
/// The platform precondition is checked before any comparison: a derived
/// set for one platform is never merged into an administration for
/// another. Cancelling at the strategy menu aborts the whole run,
/// including pending additions.
///
/// # Errors
/// Returns [`SightlineError::PlatformMismatch`] on the platform
/// precondition and [`SightlineError::Decision`] when the decision port
/// answers out of protocol.
pub fn reconcile(
    derived: &TechniqueAdminDoc,
    persisted: TechniqueAdminDoc,
    strategy: MatchStrategy,
    port: &mut dyn DecisionPort,
) -> Result<ReconcileOutcome, SightlineError> {
    if derived.platform != persisted.platform {
        return Err(SightlineError::PlatformMismatch {
            derived: derived.platform.clone(),
            persisted: persisted.platform.clone(),
        });
    }

    let mut doc = persisted;

    // Techniques we now have visibility on but that are absent from the
    // persisted administration.
    let addition_ids: Vec<String> = derived
        .techniques
        .iter()
        .filter(|tech| {
            !doc.techniques
                .iter()
                .any(|existing| existing.technique_id == tech.technique_id)
        })
        .map(|tech| tech.technique_id.clone())
        .collect();

    // The batch comment is asked once, up front, and lands on every entry
    // proposed this run, updates included.
    let batch_comment = if addition_ids.is_empty() {
        String::new()
    } else {
        port.addition_comment(&addition_ids)?.unwrap_or_default()
    };

    let proposals = build_proposals(derived, &batch_comment);

    // Diff discovery and run-level provenance classification. The
    // classification flips to mixed the moment both provenances are seen;
    // the candidate list itself is always collected in full.
    let mut candidates = Vec::new();
    let mut saw_manual = false;
    let mut saw_auto = false;
    for (tech_index, entry) in doc.techniques.iter().enumerate() {
        let Some(proposal) = proposals.get(entry.technique_id.as_str()) else {
            continue;
        };
        for (scope_index, scope) in entry.visibility.iter().enumerate() {
            if !strategy.pairs(scope, &proposal.labels) {
                continue;
            }
            if logbook::latest_score(&scope.score_logbook) == Some(proposal.entry.score) {
                continue;
            }
            let auto = logbook::latest_auto_generated(&scope.score_logbook);
            if auto {
                saw_auto = true;
            } else {
                saw_manual = true;
            }
            candidates.push(Candidate {
                tech_index,
                scope_index,
                auto,
            });
        }
    }
    let eligible = candidates.len();

    if candidates.is_empty() {
        let added = append_additions(&mut doc, derived, &addition_ids, &batch_comment);
        return Ok(ReconcileOutcome {
            document: doc,
            added,
            updated: Vec::new(),
            eligible,
            cancelled: false,
        });
    }

    let provenance = match (saw_manual, saw_auto) {
        (true, true) => Provenance::Mixed,
        (false, true) => Provenance::AllAuto,
        _ => Provenance::AllManual,
    };

    let options: &[UpdateStrategy] = match provenance {
        Provenance::AllManual | Provenance::AllAuto => &[
            UpdateStrategy::ApplyAll,
            UpdateStrategy::ReviewEach,
            UpdateStrategy::Cancel,
        ],
        Provenance::Mixed => &[
            UpdateStrategy::AutoOnly,
            UpdateStrategy::AutoPlusReview,
            UpdateStrategy::ApplyAll,
            UpdateStrategy::ReviewEach,
            UpdateStrategy::Cancel,
        ],
    };

    let chosen = port.select_strategy(provenance, eligible, options)?;
    if !options.contains(&chosen) {
        return Err(SightlineError::Decision(format!(
            "strategy '{}' is not among the offered options",
            chosen.label()
        )));
    }

    if chosen == UpdateStrategy::Cancel {
        return Ok(ReconcileOutcome {
            document: doc,
            added: Vec::new(),
            updated: Vec::new(),
            eligible,
            cancelled: true,
        });
    }

    let added = append_additions(&mut doc, derived, &addition_ids, &batch_comment);

    let mut updated = Vec::new();
    let mut handled = 0_usize;
    for candidate in &candidates {
        let action = match chosen {
            UpdateStrategy::ApplyAll => Action::Auto,
            UpdateStrategy::ReviewEach => Action::Review,
            UpdateStrategy::AutoOnly => {
                if candidate.auto {
                    Action::Auto
                } else {
                    Action::Skip
                }
            }
            UpdateStrategy::AutoPlusReview => {
                if candidate.auto {
                    Action::Auto
                } else {
                    Action::Review
                }
            }
            UpdateStrategy::Cancel => Action::Skip,
        };

        let entry = &doc.techniques[candidate.tech_index];
        let Some(proposal) = proposals.get(entry.technique_id.as_str()) else {
            continue;
        };

        let approved = match action {
            Action::Skip => continue,
            Action::Auto => true,
            Action::Review => {
                let scope = &entry.visibility[candidate.scope_index];
                let view = CandidateView {
                    technique_id: entry.technique_id.clone(),
                    technique_name: entry.technique_name.clone(),
                    applicable_to: scope.applicable_to.clone(),
                    scope_comment: scope.comment.clone(),
                    old_date: logbook::latest_date(&scope.score_logbook),
                    old_score: logbook::latest_score(&scope.score_logbook),
                    old_comment: logbook::latest_comment(&scope.score_logbook).to_string(),
                    new_date: proposal.entry.date,
                    new_score: proposal.entry.score,
                    new_comment: proposal.entry.comment.clone(),
                };
                port.review_update(&view, eligible - handled)?
            }
        };
        handled += 1;

        if approved {
            let new_entry = proposal.entry.clone();
            let tech = &mut doc.techniques[candidate.tech_index];
            let applicable_to = tech.visibility[candidate.scope_index].applicable_to.clone();
            logbook::insert_head(
                &mut tech.visibility[candidate.scope_index].score_logbook,
                new_entry,
            );
            updated.push(AppliedUpdate {
                technique_id: tech.technique_id.clone(),
                applicable_to,
            });
        }
    }

    Ok(ReconcileOutcome {
        document: doc,
        added,
        updated,
        eligible,
        cancelled: false,
    })
}

fn build_proposals<'a>(
    derived: &'a TechniqueAdminDoc,
    batch_comment: &str,
) -> BTreeMap<&'a str, Proposal> {
    let mut proposals = BTreeMap::new();
    for tech in &derived.techniques {
        let Some(scope) = tech.visibility.first() else {
            continue;
        };
        let Some(head) = scope.score_logbook.first() else {
            continue;
        };
        let mut entry = head.clone();
        entry.comment = batch_comment.to_string();
        proposals.insert(
            tech.technique_id.as_str(),
            Proposal {
                entry,
                labels: scope.applicable_to.clone(),
            },
        );
    }
    proposals
}

fn append_additions(
    doc: &mut TechniqueAdminDoc,
    derived: &TechniqueAdminDoc,
    addition_ids: &[String],
    batch_comment: &str,
) -> Vec<String> {
    let mut added = Vec::new();
    for tech in &derived.techniques {
        if !addition_ids.contains(&tech.technique_id) {
            continue;
        }
        let mut new_entry: TechniqueEntry = tech.clone();
        for scope in &mut new_entry.visibility {
            if let Some(head) = scope.score_logbook.first_mut() {
                head.comment = batch_comment.to_string();
            }
        }
        added.push(new_entry.technique_id.clone());
        doc.techniques.push(new_entry);
    }
    added
}
