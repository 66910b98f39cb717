//! Watchlist screening
//!
//! Name matching uses a token-set similarity built on Jaro-Winkler token
//! alignment: each token is paired with its best counterpart on the other
//! side, pairings below a floor contribute nothing, and the two directions
//! are averaged so the measure is symmetric. Scores land in [0, 1] and are
//! classified against configured thresholds.

use kycflow_common::config::ScreeningConfig;
use kycflow_common::db::models::WatchlistEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strsim::jaro_winkler;

/// Token pairings scoring below this contribute zero, so names with no
/// token in common score 0.0
const TOKEN_FLOOR: f64 = 0.85;

/// Penalty multiplier when a corroborating attribute contradicts the entry
const DOB_CONTRADICTION_PENALTY: f64 = 0.5;
const COUNTRY_CONTRADICTION_PENALTY: f64 = 0.9;

/// Screening classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Clear,
    Review,
    Hit,
}

impl ScreeningOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreeningOutcome::Clear => "clear",
            ScreeningOutcome::Review => "review",
            ScreeningOutcome::Hit => "hit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clear" => Some(ScreeningOutcome::Clear),
            "review" => Some(ScreeningOutcome::Review),
            "hit" => Some(ScreeningOutcome::Hit),
            _ => None,
        }
    }

    /// HIT and REVIEW both require human disposition
    pub fn requires_outreach(&self) -> bool {
        !matches!(self, ScreeningOutcome::Clear)
    }
}

/// The attributes screening matches on
#[derive(Debug, Clone, Default)]
pub struct ScreeningIdentity {
    pub name: String,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub country: Option<String>,
}

/// One watchlist entry that scored at or above the review threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistMatch {
    pub entry_id: i64,
    pub entry_name: String,
    pub list_name: String,
    pub score: f64,
}

/// Full screening output for a case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub outcome: ScreeningOutcome,
    /// Highest score across the watchlist, 0.0 when the list is empty
    pub score: f64,
    /// Triggering entries, best first, ties broken by lowest entry id
    pub matches: Vec<WatchlistMatch>,
}

/// Tokenize a name: lowercase, split on non-alphanumeric, dedupe
fn tokens(name: &str) -> BTreeSet<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Best Jaro-Winkler alignment of one token against the other side,
/// floored to zero below the pairing threshold
fn best_alignment(token: &str, others: &BTreeSet<String>) -> f64 {
    let best = others
        .iter()
        .map(|other| jaro_winkler(token, other))
        .fold(0.0, f64::max);
    if best >= TOKEN_FLOOR {
        best
    } else {
        0.0
    }
}

/// Token-set name similarity in [0, 1]; symmetric, 1.0 for identical
/// token sets, 0.0 when no tokens align
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let forward: f64 = tokens_a.iter().map(|t| best_alignment(t, &tokens_b)).sum();
    let backward: f64 = tokens_b.iter().map(|t| best_alignment(t, &tokens_a)).sum();

    (forward + backward) / (tokens_a.len() + tokens_b.len()) as f64
}

/// Score one watchlist entry against the identity
fn score_entry(identity: &ScreeningIdentity, entry: &WatchlistEntry) -> f64 {
    let mut score = name_similarity(&identity.name, &entry.full_name);

    // Corroborating attributes only ever lower the score; they cannot
    // turn a weak name match into a hit
    if let (Some(dob), Some(entry_dob)) = (identity.date_of_birth, entry.date_of_birth) {
        if dob != entry_dob {
            score *= DOB_CONTRADICTION_PENALTY;
        }
    }
    if let (Some(country), Some(entry_country)) =
        (identity.country.as_deref(), entry.country.as_deref())
    {
        if !country.trim().eq_ignore_ascii_case(entry_country.trim()) {
            score *= COUNTRY_CONTRADICTION_PENALTY;
        }
    }

    score
}

/// Screen an identity against the active watchlist.
///
/// Deterministic: the same identity, list and thresholds always produce
/// the same result, with matches ordered by score then lowest entry id.
pub fn screen(
    identity: &ScreeningIdentity,
    watchlist: &[WatchlistEntry],
    config: &ScreeningConfig,
) -> ScreeningResult {
    let mut matches: Vec<WatchlistMatch> = watchlist
        .iter()
        .map(|entry| WatchlistMatch {
            entry_id: entry.id,
            entry_name: entry.full_name.clone(),
            list_name: entry.list_name.clone(),
            score: score_entry(identity, entry),
        })
        .filter(|m| m.score >= config.review_threshold)
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.entry_id.cmp(&b.entry_id))
    });

    let score = watchlist
        .iter()
        .map(|entry| score_entry(identity, entry))
        .fold(0.0, f64::max);

    let outcome = if score >= config.hit_threshold {
        ScreeningOutcome::Hit
    } else if score >= config.review_threshold {
        ScreeningOutcome::Review
    } else {
        ScreeningOutcome::Clear
    };

    ScreeningResult {
        outcome,
        score,
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(id: i64, name: &str) -> WatchlistEntry {
        WatchlistEntry {
            id,
            full_name: name.to_string(),
            date_of_birth: None,
            country: Some("US".to_string()),
            list_name: "sanctions".to_string(),
            active: true,
            created_at: chrono::Utc::now().into(),
        }
    }

    fn identity(name: &str) -> ScreeningIdentity {
        ScreeningIdentity {
            name: name.to_string(),
            date_of_birth: None,
            country: Some("US".to_string()),
        }
    }

    fn config() -> ScreeningConfig {
        ScreeningConfig {
            hit_threshold: 0.90,
            review_threshold: 0.70,
            max_retries: 3,
        }
    }

    #[test]
    fn test_identical_names_score_one() {
        assert_eq!(name_similarity("Acme Corp", "Acme Corp"), 1.0);
        assert_eq!(name_similarity("ACME CORP", "acme corp"), 1.0);
        // Token order and punctuation are irrelevant
        assert_eq!(name_similarity("Corp, Acme", "Acme Corp"), 1.0);
    }

    #[test]
    fn test_disjoint_names_score_zero() {
        assert_eq!(name_similarity("Quartz Holdings", "Meadow Farms"), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let forward = name_similarity("Acme Global Corp", "Acme Corporation");
        let backward = name_similarity("Acme Corporation", "Acme Global Corp");
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_similarity_is_bounded() {
        for (a, b) in [
            ("Acme Corp", "Acme Corp Ltd"),
            ("John Smith", "Jon Smith"),
            ("", "Acme"),
            ("", ""),
        ] {
            let score = name_similarity(a, b);
            assert!((0.0..=1.0).contains(&score), "{} vs {} -> {}", a, b, score);
        }
    }

    #[test]
    fn test_near_match_scores_high() {
        let score = name_similarity("Acme Corp", "Acme Corp.");
        assert!(score > 0.95, "got {}", score);
    }

    #[test]
    fn test_empty_watchlist_is_clear() {
        let result = screen(&identity("Acme Corp"), &[], &config());
        assert_eq!(result.outcome, ScreeningOutcome::Clear);
        assert_eq!(result.score, 0.0);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_exact_name_is_hit() {
        let watchlist = vec![entry(1, "Acme Corp"), entry(2, "Meadow Farms")];
        let result = screen(&identity("Acme Corp"), &watchlist, &config());
        assert_eq!(result.outcome, ScreeningOutcome::Hit);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].entry_id, 1);
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive() {
        // score == hit threshold classifies as HIT
        let cfg = ScreeningConfig {
            hit_threshold: 1.0,
            review_threshold: 0.70,
            max_retries: 3,
        };
        let watchlist = vec![entry(1, "Acme Corp")];
        let result = screen(&identity("Acme Corp"), &watchlist, &cfg);
        assert_eq!(result.outcome, ScreeningOutcome::Hit);
    }

    #[test]
    fn test_ties_break_on_lowest_entry_id() {
        let watchlist = vec![entry(7, "Acme Corp"), entry(3, "Acme Corp")];
        let result = screen(&identity("Acme Corp"), &watchlist, &config());
        assert_eq!(result.matches[0].entry_id, 3);
        assert_eq!(result.matches[1].entry_id, 7);
    }

    #[test]
    fn test_dob_contradiction_downgrades() {
        let mut listed = entry(1, "John Smith");
        listed.date_of_birth = NaiveDate::from_ymd_opt(1970, 1, 1);

        let mut subject = identity("John Smith");
        subject.date_of_birth = NaiveDate::from_ymd_opt(1985, 7, 20);

        let result = screen(&subject, &[listed.clone()], &config());
        assert_eq!(result.outcome, ScreeningOutcome::Clear);

        // Matching date of birth leaves the name score untouched
        subject.date_of_birth = NaiveDate::from_ymd_opt(1970, 1, 1);
        let result = screen(&subject, &[listed], &config());
        assert_eq!(result.outcome, ScreeningOutcome::Hit);
    }

    #[test]
    fn test_screening_is_deterministic() {
        let watchlist = vec![
            entry(1, "Acme Corp"),
            entry(2, "Acme Corporation Ltd"),
            entry(3, "Quartz Holdings"),
        ];
        let subject = identity("Acme Corp Ltd");

        let first = screen(&subject, &watchlist, &config());
        let second = screen(&subject, &watchlist, &config());
        assert_eq!(first.score, second.score);
        assert_eq!(
            serde_json::to_string(&first.matches).unwrap(),
            serde_json::to_string(&second.matches).unwrap()
        );
    }
}
