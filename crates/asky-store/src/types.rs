use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A persisted user+assistant pair. The interaction id is the assistant
/// message row id. Orphan rows are tolerated when pairing history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub timestamp: String,
    pub session_id: Option<i64>,
    /// None for legacy rows written before roles existed.
    pub role: Option<String>,
    pub content: String,
    pub query: String,
    pub answer: String,
    pub summary: Option<String>,
    pub model: String,
    pub token_count: Option<i64>,
}

/// A persisted conversation session.
///
/// A compacted session keeps its raw messages; `compacted_summary` replaces
/// the earliest messages for context-window accounting only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub name: Option<String>,
    pub model: String,
    pub created_at: String,
    pub compacted_summary: Option<String>,
    pub memory_auto_extract: bool,
    pub max_turns: Option<i64>,
}

/// One raw message row inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub timestamp: String,
    pub session_id: Option<i64>,
    pub role: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    pub token_count: Option<i64>,
}

/// A persistent user-memory fact. `session_id = None` means global scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemory {
    pub id: i64,
    pub content: String,
    pub category: Option<String>,
    pub embedding_model: Option<String>,
    pub created_at: String,
    pub session_id: Option<i64>,
}

/// Row selector for bulk deletes: a single id, a comma list, an inclusive
/// range, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelector {
    All,
    Ids(Vec<i64>),
    Range(i64, i64),
}

impl DeleteSelector {
    /// Parse `"7"`, `"1,4,9"`, or `"5-10"` (range ends may arrive swapped).
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidSelector("empty selector".into()));
        }

        if let Some((a, b)) = trimmed.split_once('-') {
            let start: i64 = a.trim().parse().map_err(|_| {
                StoreError::InvalidSelector(format!("invalid range: {trimmed}"))
            })?;
            let end: i64 = b.trim().parse().map_err(|_| {
                StoreError::InvalidSelector(format!("invalid range: {trimmed}"))
            })?;
            let (start, end) = if start > end { (end, start) } else { (start, end) };
            return Ok(Self::Range(start, end));
        }

        if trimmed.contains(',') {
            let ids = trimmed
                .split(',')
                .map(|t| {
                    t.trim().parse::<i64>().map_err(|_| {
                        StoreError::InvalidSelector(format!("invalid id list: {trimmed}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self::Ids(ids));
        }

        let id: i64 = trimmed
            .parse()
            .map_err(|_| StoreError::InvalidSelector(format!("invalid id: {trimmed}")))?;
        Ok(Self::Ids(vec![id]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_id() {
        assert_eq!(DeleteSelector::parse("7").unwrap(), DeleteSelector::Ids(vec![7]));
    }

    #[test]
    fn parses_id_list() {
        assert_eq!(
            DeleteSelector::parse("1, 4,9").unwrap(),
            DeleteSelector::Ids(vec![1, 4, 9])
        );
    }

    #[test]
    fn parses_range_and_swaps_ends() {
        assert_eq!(DeleteSelector::parse("10-5").unwrap(), DeleteSelector::Range(5, 10));
    }

    #[test]
    fn rejects_garbage() {
        assert!(DeleteSelector::parse("five").is_err());
        assert!(DeleteSelector::parse("").is_err());
        assert!(DeleteSelector::parse("1-x").is_err());
    }
}
