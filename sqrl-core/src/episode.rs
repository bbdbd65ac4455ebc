//! Episode chunker (§4.F): normalizes a session's event stream into
//! bounded episodes and computes their stats (error count, retry loops,
//! frustration).

use crate::types::{Episode, Event, Frustration, Role};
use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

const BOUNDARY_GAP_MINUTES: i64 = 30;
const CONSECUTIVE_ASSISTANT_BOUNDARY: usize = 10;
const MIN_EPISODE_LEN: usize = 3;
const RETRY_LOOKBACK: usize = 5;
const RETRY_SIMILARITY_THRESHOLD: f64 = 0.30;

static SEVERE_EXCLAMATIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"!!+").unwrap_or_else(|_| Regex::new(r"$^").unwrap()));
static MILD_QUESTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?\?+").unwrap_or_else(|_| Regex::new(r"$^").unwrap()));
static MODERATE_WHY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)why (won't|doesn't|isn't|can't)").unwrap_or_else(|_| Regex::new(r"$^").unwrap()));
static MODERATE_STILL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)still (not|doesn't|won't)").unwrap_or_else(|_| Regex::new(r"$^").unwrap()));

const SEVERE_PROFANITY: &[&str] = &["fuck", "shit", "damn it", "goddamn"];
const MODERATE_TOKENS: &[&str] = &["finally", "ugh"];
const MILD_TOKENS: &[&str] = &["hmm", "hm"];

const ERROR_SUBSTRINGS: &[&str] = &[
    "error:",
    "exception:",
    "traceback",
    "failed",
    "errno",
    "permission denied",
    "not found",
    "syntax error",
];

/// Rule-based frustration classifier over a single user message (§4.F).
/// Evaluated severe → moderate → mild; first match wins; default `none`.
pub fn detect_frustration(message: &str) -> Frustration {
    let lower = message.to_lowercase();

    let severe = SEVERE_PROFANITY.iter().any(|tok| lower.contains(tok)) || SEVERE_EXCLAMATIONS.is_match(message);
    if severe {
        return Frustration::Severe;
    }

    let moderate = MODERATE_TOKENS.iter().any(|tok| lower.contains(tok))
        || MODERATE_WHY.is_match(message)
        || MODERATE_STILL.is_match(message);
    if moderate {
        return Frustration::Moderate;
    }

    let mild = MILD_TOKENS.iter().any(|tok| lower.contains(tok)) || MILD_QUESTIONS.is_match(message);
    if mild {
        return Frustration::Mild;
    }

    Frustration::None
}

/// Whether a tool result's text matches one of the fixed error substrings
/// (§4.F), case-insensitively.
pub fn is_error_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

fn normalized_prefix(text: &str) -> String {
    text.to_lowercase().chars().take(50).collect()
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_string()).collect()
}

fn similar(a: &str, b: &str) -> bool {
    let wa = word_set(a);
    let wb = word_set(b);
    if wa.is_empty() || wb.is_empty() {
        return false;
    }
    let intersection = wa.intersection(&wb).count();
    let smaller = wa.len().min(wb.len());
    (intersection as f64 / smaller as f64) >= RETRY_SIMILARITY_THRESHOLD
}

/// Counts how many of the episode's error events are "retry loops": an
/// error whose normalized prefix is similar (§4.F) to any of the last
/// `RETRY_LOOKBACK` error events preceding it.
pub fn count_retry_loops(events: &[Event]) -> u32 {
    let mut error_texts: Vec<String> = Vec::new();
    let mut retry_count = 0u32;

    for event in events {
        if !event.is_error {
            continue;
        }
        let text = event.raw_snippet.as_deref().unwrap_or(&event.summary);
        let prefix = normalized_prefix(text);

        let window_start = error_texts.len().saturating_sub(RETRY_LOOKBACK);
        let matches_recent = error_texts[window_start..]
            .iter()
            .any(|prior| similar(prior, &prefix));
        if matches_recent {
            retry_count += 1;
        }
        error_texts.push(prefix);
    }

    retry_count
}

/// Splits a time-ordered event list into boundary indices (§4.F). Index 0
/// is always a boundary.
fn boundary_indices(events: &[Event]) -> Vec<usize> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut boundaries = vec![0];
    let mut consecutive_assistant = 0usize;

    for i in 1..events.len() {
        // Count of consecutive assistant events ending at i - 1, updated
        // before the boundary check so it reflects the run immediately
        // preceding the event under test.
        if events[i - 1].role == Role::Assistant {
            consecutive_assistant += 1;
        } else {
            consecutive_assistant = 0;
        }

        let gap = events[i].ts - events[i - 1].ts;
        let mut is_boundary = gap > Duration::minutes(BOUNDARY_GAP_MINUTES);

        if events[i].role == Role::User && consecutive_assistant >= CONSECUTIVE_ASSISTANT_BOUNDARY {
            is_boundary = true;
        }

        if is_boundary {
            boundaries.push(i);
        }
    }

    boundaries
}

/// Builds one `Episode` from a contiguous event slice, computing its
/// stats.
fn build_episode(project_id: Option<String>, events: Vec<Event>) -> Episode {
    let error_count = events.iter().filter(|e| e.is_error).count() as u32;
    let retry_loops = count_retry_loops(&events);
    let user_frustration = events
        .iter()
        .filter(|e| e.role == Role::User)
        .map(|e| detect_frustration(&e.summary))
        .max()
        .unwrap_or(Frustration::None);

    Episode {
        id: Uuid::new_v4(),
        project_id,
        events,
        error_count,
        retry_loops,
        user_frustration,
        processed: false,
        created_at: chrono::Utc::now(),
    }
}

/// Chunks a time-ordered event list into episodes (§4.F): detects
/// boundaries, merges short (< 3 event) episodes into the previous one,
/// and emits a single whole-list episode when no boundaries are found
/// beyond index 0.
pub fn chunk_episodes(project_id: Option<String>, events: Vec<Event>) -> Vec<Episode> {
    if events.is_empty() {
        return Vec::new();
    }

    let boundaries = boundary_indices(&events);

    let mut slices: Vec<Vec<Event>> = Vec::new();
    for (i, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).copied().unwrap_or(events.len());
        slices.push(events[start..end].to_vec());
    }

    // Merge episodes shorter than MIN_EPISODE_LEN into the previous one.
    let mut merged: Vec<Vec<Event>> = Vec::new();
    for slice in slices.drain(..) {
        if slice.len() < MIN_EPISODE_LEN && !merged.is_empty() {
            merged.last_mut().expect("checked non-empty above").extend(slice);
        } else {
            merged.push(slice);
        }
    }

    merged
        .into_iter()
        .map(|slice| build_episode(project_id.clone(), slice))
        .collect()
}
