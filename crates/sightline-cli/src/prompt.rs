//! Console adapter for the reconciler's decision boundary.
//!
//! Prompts re-ask until the answer is well-formed and block indefinitely;
//! a closed stdin is the only way out besides a valid answer.

use std::io::{self, BufRead, Write};

use sightline_core::display_date;
use sightline_core::reconcile::{CandidateView, DecisionPort, Provenance, UpdateStrategy};
use sightline_core::SightlineError;

const REVIEW_RULE_WIDTH: usize = 80;
const REVIEW_LABEL_INDENT: usize = 23;

fn read_answer() -> Result<String, SightlineError> {
    let mut buffer = String::new();
    let bytes = io::stdin()
        .lock()
        .read_line(&mut buffer)
        .map_err(|err| SightlineError::Decision(format!("failed to read input: {err}")))?;
    if bytes == 0 {
        return Err(SightlineError::Decision(
            "input closed while waiting for an answer".to_string(),
        ));
    }
    Ok(buffer.trim().to_string())
}

fn flush_prompt() {
    let _ = io::stdout().flush();
}

/// Asks until the answer is one of y/yes/n/no (case-insensitive).
///
/// # Errors
/// Returns [`SightlineError::Decision`] when stdin closes or fails.
pub fn ask_yes_no(question: &str) -> Result<bool, SightlineError> {
    loop {
        println!("{question}");
        print!(" >>   y(yes) / n(no): ");
        flush_prompt();
        let answer = read_answer()?.to_lowercase();
        println!();
        match answer.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => {}
        }
    }
}

/// Asks a numbered multiple-choice question; returns the chosen index.
///
/// # Errors
/// Returns [`SightlineError::Decision`] when stdin closes or fails.
pub fn ask_multiple_choice(question: &str, options: &[&str]) -> Result<usize, SightlineError> {
    loop {
        println!("{question}");
        for (index, option) in options.iter().enumerate() {
            println!("  {}) {option}", index + 1);
        }
        print!(" >>   ");
        flush_prompt();
        let answer = read_answer()?;
        println!();
        if let Ok(choice) = answer.parse::<usize>() {
            if choice >= 1 && choice <= options.len() {
                return Ok(choice - 1);
            }
        }
    }
}

/// Indents every continuation line of a multiline value so it aligns with
/// the field labels of the review view.
fn indent_comment(comment: &str, indent: usize) -> String {
    if comment.contains('\n') {
        comment.replace('\n', &format!("\n{}", " ".repeat(indent)))
    } else {
        comment.to_string()
    }
}

/// Interactive [`DecisionPort`] over stdin/stdout.
pub struct ConsolePort;

impl DecisionPort for ConsolePort {
    fn addition_comment(
        &mut self,
        _technique_ids: &[String],
    ) -> Result<Option<String>, SightlineError> {
        if !ask_yes_no("\nDo you want to fill in the visibility comment for the updated scores?")? {
            return Ok(None);
        }
        print!(" >>   Visibility comment for in the new 'score' object: ");
        flush_prompt();
        let comment = read_answer()?;
        println!();
        Ok(Some(comment))
    }

    fn select_strategy(
        &mut self,
        provenance: Provenance,
        eligible: usize,
        options: &[UpdateStrategy],
    ) -> Result<UpdateStrategy, SightlineError> {
        println!("\nA total of {eligible} visibility scores are eligible for an update.\n");

        let question = match provenance {
            Provenance::AllManual => {
                "The current visibility scores were set manually. How do you want to update them?"
            }
            Provenance::AllAuto => {
                "The current visibility scores were generated automatically. \
                 How do you want to update them?"
            }
            Provenance::Mixed => {
                "The current visibility scores are a mix of manually set and automatically \
                 generated scores. How do you want to update them?"
            }
        };

        let labels: Vec<&str> = options.iter().map(|option| option.label()).collect();
        let choice = ask_multiple_choice(question, &labels)?;
        Ok(options[choice])
    }

    fn review_update(
        &mut self,
        view: &CandidateView,
        remaining: usize,
    ) -> Result<bool, SightlineError> {
        println!("{}", "-".repeat(REVIEW_RULE_WIDTH));
        let counter = format!("[updates remaining: {remaining}]");
        println!(
            "{}{counter}",
            " ".repeat(REVIEW_RULE_WIDTH.saturating_sub(counter.len()))
        );
        println!();
        println!("Visibility object:");
        println!(
            " - Technique ID/name:  {} / {}",
            view.technique_id, view.technique_name
        );
        println!(" - Applicable to:      {}", view.applicable_to.join(", "));
        println!(
            " - Technique comment:  {}",
            indent_comment(&view.scope_comment, REVIEW_LABEL_INDENT)
        );
        println!();
        println!("OLD score object:");
        println!(" - Date:               {}", display_date(view.old_date));
        println!(
            " - Score:              {}",
            view.old_score
                .map_or_else(|| "none".to_string(), |score| score.to_string())
        );
        println!(
            " - Visibility comment: {}",
            indent_comment(&view.old_comment, REVIEW_LABEL_INDENT)
        );
        println!("NEW score object:");
        println!(" - Date:               {}", display_date(view.new_date));
        println!(" - Score:              {}", view.new_score);
        println!(
            " - Visibility comment: {}",
            indent_comment(&view.new_comment, REVIEW_LABEL_INDENT)
        );
        println!(" - Auto generated:     true");
        println!();
        ask_yes_no("Update the score?")
    }
}
