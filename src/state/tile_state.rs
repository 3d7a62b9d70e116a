//! Tile lifecycle states
//!
//! ```text
//! pending -> in_progress -> completed
//! in_progress -> failed
//! in_progress -> pending   (restart before completion)
//! failed -> pending        (restart, when failed tiles are reset)
//! ```
use std::fmt;

/// Represents the current state of a tile in the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    /// Tile row exists but has not been visited yet
    Pending,

    /// The driver is currently running this tile
    InProgress,

    /// All places of the tile were processed
    Completed,

    /// The tile run raised an error; not retried within the same run
    Failed,
}

impl TileStatus {
    /// Returns true if the driver should not run this tile again without a reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the transition is part of the tile lifecycle
    pub fn can_transition_to(&self, next: TileStatus) -> bool {
        use TileStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (Failed, Pending)
                // set_tile_in_progress is an unconditional upsert
                | (InProgress, InProgress)
                | (Failed, InProgress)
        )
    }

    /// Converts the tile state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a tile state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all tile states
    pub fn all_states() -> [Self; 4] {
        [Self::Pending, Self::InProgress, Self::Completed, Self::Failed]
    }
}

impl fmt::Display for TileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_string_roundtrip() {
        for state in TileStatus::all_states() {
            assert_eq!(TileStatus::from_db_string(state.to_db_string()), Some(state));
        }
        assert_eq!(TileStatus::from_db_string("done"), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(!TileStatus::Pending.is_terminal());
        assert!(!TileStatus::InProgress.is_terminal());
        assert!(TileStatus::Completed.is_terminal());
        assert!(TileStatus::Failed.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(TileStatus::Pending.can_transition_to(TileStatus::InProgress));
        assert!(TileStatus::InProgress.can_transition_to(TileStatus::Completed));
        assert!(TileStatus::InProgress.can_transition_to(TileStatus::Pending));
        assert!(TileStatus::Failed.can_transition_to(TileStatus::Pending));

        assert!(!TileStatus::Completed.can_transition_to(TileStatus::Pending));
        assert!(!TileStatus::Pending.can_transition_to(TileStatus::Completed));
    }
}
