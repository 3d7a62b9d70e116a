/// Outcome of the most recent extraction of a place
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceStatus {
    Success,
    Failed,
}

impl PlaceStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored status
    ///
    /// Rows written before statuses existed carry NULL or an empty string and count
    /// as successes.
    pub fn from_db_value(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("") | Some("success") => Some(Self::Success),
            Some("failed") => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PlaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
