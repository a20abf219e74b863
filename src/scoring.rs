//! Relevance and importance heuristics for candidate articles.
//!
//! Both scores are integers in `0..=100`. The functions never fail: malformed
//! URLs or missing dates fall back to neutral defaults.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use url::Url;

/// Authority assumed for outlets missing from the table.
pub const DEFAULT_AUTHORITY: u8 = 50;

/// Curated outlet authority: major outlets 88-95, regional and specialty
/// outlets 75-88, other recognized sources 60-75.
const BUILTIN_AUTHORITY: &[(&str, u8)] = &[
    // Major national and international outlets
    ("nytimes.com", 95),
    ("washingtonpost.com", 95),
    ("wsj.com", 95),
    ("bbc.com", 95),
    ("bbc.co.uk", 95),
    ("reuters.com", 95),
    ("apnews.com", 95),
    ("bloomberg.com", 92),
    ("cnn.com", 90),
    ("nbcnews.com", 90),
    ("cbsnews.com", 90),
    ("abcnews.go.com", 90),
    ("theguardian.com", 90),
    ("economist.com", 90),
    ("forbes.com", 88),
    ("fortune.com", 88),
    ("npr.org", 88),
    // Regional and specialty outlets
    ("businessinsider.com", 85),
    ("latimes.com", 85),
    ("politico.com", 85),
    ("pbs.org", 85),
    ("usatoday.com", 82),
    ("chicagotribune.com", 82),
    ("bostonglobe.com", 82),
    ("axios.com", 82),
    ("time.com", 82),
    ("sfchronicle.com", 80),
    ("thehill.com", 80),
    ("techcrunch.com", 80),
    ("wired.com", 80),
    ("variety.com", 80),
    ("hollywoodreporter.com", 80),
    ("espn.com", 80),
    ("theverge.com", 78),
    ("deadline.com", 78),
    ("si.com", 78),
    ("nypost.com", 75),
    ("foxnews.com", 75),
    ("msnbc.com", 75),
    ("newsweek.com", 75),
    // Other recognized sources
    ("bleacherreport.com", 72),
    ("vox.com", 72),
    ("huffpost.com", 70),
    ("slate.com", 70),
    ("buzzfeednews.com", 68),
    ("salon.com", 65),
    ("dailymail.co.uk", 60),
];

/// Immutable host -> authority lookup, built once at startup and shared by
/// reference with the search client.
#[derive(Debug, Clone)]
pub struct AuthorityTable {
    scores: HashMap<String, u8>,
}

impl Default for AuthorityTable {
    fn default() -> Self {
        Self {
            scores: BUILTIN_AUTHORITY
                .iter()
                .map(|(host, score)| (host.to_string(), *score))
                .collect(),
        }
    }
}

impl AuthorityTable {
    /// An empty table; every host scores [`DEFAULT_AUTHORITY`].
    pub fn empty() -> Self {
        Self {
            scores: HashMap::new(),
        }
    }

    /// Returns a copy of this table with `overrides` layered on top.
    /// Hosts are lowercased and stripped of a leading `www.`; scores are capped at 100.
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: AsRef<str>,
    {
        for (host, score) in overrides {
            let host = host.as_ref().trim().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
            self.scores.insert(host, score.min(100));
        }
        self
    }

    /// Loads a JSON object of `{"host": score}` pairs and merges it over the
    /// built-in table.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read authority table {}", path.display()))?;
        let overrides: HashMap<String, u8> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid authority table {}", path.display()))?;
        info!("Loaded {} outlet authority overrides from {}", overrides.len(), path.display());
        Ok(Self::default().with_overrides(overrides))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Authority of the host serving `url`, or [`DEFAULT_AUTHORITY`].
    pub fn authority_for(&self, url: &str) -> u8 {
        host_without_www(url)
            .and_then(|host| self.scores.get(&host).copied())
            .unwrap_or(DEFAULT_AUTHORITY)
    }

    /// Source authority plus a recency boost for coverage from the last day.
    pub fn importance_score(
        &self,
        url: &str,
        published_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> u8 {
        let authority = f64::from(self.authority_for(url));
        let boost = f64::from(recency_boost(published_at, now));
        (authority + boost).min(100.0).round() as u8
    }
}

/// Lowercased hostname of `url` with a leading `www.` removed.
pub fn host_without_www(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn recency_boost(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    let Some(published_at) = published_at else {
        return 0;
    };
    // Dates in the future count as fresh.
    let hours_ago = (now - published_at).num_seconds() as f64 / 3600.0;
    if hours_ago <= 6.0 {
        10
    } else if hours_ago <= 12.0 {
        7
    } else if hours_ago <= 24.0 {
        4
    } else {
        0
    }
}

/// Scores how well a result at search position `rank` matches `query`.
///
/// Position decays logarithmically from 95 down to a floor of 30. Query words
/// longer than two characters found in the title add up to 15 points, and the
/// whole query appearing verbatim adds 5 more.
pub fn relevance_score(rank: u32, title: &str, query: &str) -> u8 {
    let rank = f64::from(rank.max(1));
    let position_score = (100.0 - (rank + 1.0).log2() * 15.0).clamp(30.0, 95.0);

    let title_lower = title.to_lowercase();
    let query_lower = query.trim().to_lowercase();

    let words: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|word| word.chars().count() > 2)
        .collect();
    let keyword_boost = if words.is_empty() {
        0.0
    } else {
        let matched = words
            .iter()
            .filter(|word| title_lower.contains(*word))
            .count();
        matched as f64 / words.len() as f64 * 15.0
    };

    let phrase_bonus = if !query_lower.is_empty() && title_lower.contains(&query_lower) {
        5.0
    } else {
        0.0
    };

    (position_score + keyword_boost + phrase_bonus)
        .min(100.0)
        .round() as u8
}
