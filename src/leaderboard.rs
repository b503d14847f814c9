//! Leaderboard boundary and local ranking
//!
//! A leaderboard entry carries only a nickname and the final score
//! `floor(score * multiplier)`. The local table keeps the top 10.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sim::{Seed, SessionResult};

/// Maximum number of entries to keep
pub const MAX_ENTRIES: usize = 10;
/// Longest accepted nickname, in characters
pub const MAX_NICKNAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("nickname must not be empty")]
    EmptyNickname,
    #[error("nickname is {len} characters, the limit is {max}", max = MAX_NICKNAME_LEN)]
    NicknameTooLong { len: usize },
}

/// A single leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub final_score: u64,
    /// Seed of the session, so the score can be audited by replay
    pub seed: Seed,
    pub recorded_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// Build an entry from a terminal session result. The nickname is trimmed.
    pub fn new(nickname: &str, result: &SessionResult) -> Result<Self, EntryError> {
        let nickname = validate_nickname(nickname)?;
        Ok(Self {
            nickname,
            final_score: result.final_score(),
            seed: result.seed.clone(),
            recorded_at: Utc::now(),
        })
    }
}

fn validate_nickname(value: &str) -> Result<String, EntryError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(EntryError::EmptyNickname);
    }
    if len > MAX_NICKNAME_LEN {
        return Err(EntryError::NicknameTooLong { len });
    }
    Ok(trimmed.to_owned())
}

/// Top scores, sorted descending
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a final score qualifies for the table
    pub fn qualifies(&self, final_score: u64) -> bool {
        if final_score == 0 {
            return false;
        }
        if self.entries.len() < MAX_ENTRIES {
            return true;
        }
        self.entries.last().is_none_or(|e| final_score > e.final_score)
    }

    /// Rank a score would achieve (1-indexed, None if it doesn't qualify)
    pub fn potential_rank(&self, final_score: u64) -> Option<usize> {
        if !self.qualifies(final_score) {
            return None;
        }
        let rank = self.entries.iter().position(|e| final_score > e.final_score);
        Some(rank.unwrap_or(self.entries.len()) + 1)
    }

    /// Insert an entry. Returns the rank achieved or None if it didn't qualify.
    /// Equal scores keep their arrival order.
    pub fn add(&mut self, entry: LeaderboardEntry) -> Option<usize> {
        let rank = self.potential_rank(entry.final_score)?;
        log::info!(
            "Leaderboard: {} placed #{} with {}",
            entry.nickname,
            rank,
            entry.final_score
        );
        self.entries.insert(rank - 1, entry);
        self.entries.truncate(MAX_ENTRIES);
        Some(rank)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top_score(&self) -> Option<u64> {
        self.entries.first().map(|e| e.final_score)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EndCause, SPAWN_STREAM_VERSION};

    fn result(score: u64, multiplier: f64) -> SessionResult {
        SessionResult {
            score,
            seed: Seed::from("7"),
            multiplier,
            difficulty: 50,
            cause: EndCause::LivesExhausted,
            stream_version: SPAWN_STREAM_VERSION,
        }
    }

    fn entry(name: &str, final_score: u64) -> LeaderboardEntry {
        LeaderboardEntry {
            nickname: name.to_owned(),
            final_score,
            seed: Seed::from("1"),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_uses_floored_final_score() {
        let entry = LeaderboardEntry::new("  ninja ", &result(33, 1.3)).expect("valid");
        assert_eq!(entry.nickname, "ninja");
        assert_eq!(entry.final_score, 42);
        assert_eq!(entry.seed, Seed::from("7"));
    }

    #[test]
    fn test_nickname_limits() {
        assert_eq!(
            LeaderboardEntry::new("   ", &result(10, 1.0)),
            Err(EntryError::EmptyNickname)
        );
        assert!(LeaderboardEntry::new("fifteen_chars__", &result(10, 1.0)).is_ok());
        assert_eq!(
            LeaderboardEntry::new("sixteen_chars___", &result(10, 1.0)),
            Err(EntryError::NicknameTooLong { len: 16 })
        );
        // Characters, not bytes
        assert!(LeaderboardEntry::new(&"é".repeat(15), &result(10, 1.0)).is_ok());
    }

    #[test]
    fn test_ranking_and_truncation() {
        let mut board = Leaderboard::new();
        assert!(!board.qualifies(0));
        assert_eq!(board.add(entry("a", 100)), Some(1));
        assert_eq!(board.add(entry("b", 300)), Some(1));
        assert_eq!(board.add(entry("c", 200)), Some(2));
        assert_eq!(board.add(entry("d", 200)), Some(3));
        assert_eq!(board.top_score(), Some(300));

        for n in 0..10 {
            board.add(entry("filler", 1000 + n));
        }
        assert_eq!(board.entries.len(), MAX_ENTRIES);
        assert!(!board.qualifies(300));
        assert_eq!(board.potential_rank(1005), Some(6));
        assert_eq!(board.add(entry("low", 10)), None);
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let mut board = Leaderboard::new();
        board.add(entry("x", 5));
        board.add(entry("y", 50));
        let json = board.to_json().expect("serialize");
        let loaded = Leaderboard::from_json(&json).expect("parse");
        assert_eq!(loaded.entries, board.entries);
    }
}
