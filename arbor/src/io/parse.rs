//! Extract evaluator decisions from free-text replies.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::error::{EngineError, EngineResult};
use crate::core::types::ValueLabel;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(sure|likely|impossible)\b").expect("valid label regex"));

static VOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)best\s+choice\s+is\s*:?\s*(?:choice\s*)?#?(\d+)").expect("valid vote regex")
});

/// The last value label mentioned in `text`, case-insensitive.
pub fn parse_value_label(text: &str) -> EngineResult<ValueLabel> {
    let Some(found) = LABEL_RE.captures_iter(text).last() else {
        return Err(EngineError::InvalidGeneration(format!(
            "no value label (sure/likely/impossible) in reply: {}",
            excerpt(text)
        )));
    };
    match found[1].to_ascii_lowercase().as_str() {
        "sure" => Ok(ValueLabel::Sure),
        "likely" => Ok(ValueLabel::Likely),
        _ => Ok(ValueLabel::Impossible),
    }
}

/// Zero-based index from a "The best choice is N" reply, where N counts from 1.
pub fn parse_vote(text: &str, candidates: usize) -> EngineResult<usize> {
    let Some(found) = VOTE_RE.captures_iter(text).last() else {
        return Err(EngineError::InvalidGeneration(format!(
            "no 'best choice is N' in reply: {}",
            excerpt(text)
        )));
    };
    let choice: usize = found[1]
        .parse()
        .map_err(|_| EngineError::InvalidGeneration(format!("vote '{}' is not a number", &found[1])))?;
    if choice == 0 || choice > candidates {
        return Err(EngineError::InvalidGeneration(format!(
            "vote {} is outside 1..={}",
            choice, candidates
        )));
    }
    Ok(choice - 1)
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 80 {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(80).collect();
    format!("{head}...")
}
