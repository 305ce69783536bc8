use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ROOM_ID_MAX_LEN: usize = 32;
const CHANNEL_PREFIX: &str = "room-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room code is empty")]
    Empty,
    #[error("room code is longer than {max} characters")]
    TooLong { max: usize },
    #[error("room code contains unsupported character {0:?}")]
    InvalidChar(char),
}

/// Out-of-band room code shared by the two participants.
///
/// Only ASCII letters, digits, `-` and `_` are accepted so the code can be
/// embedded in a channel name verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        Self::parse_bounded(raw, DEFAULT_ROOM_ID_MAX_LEN)
    }

    pub fn parse_bounded(raw: &str, max_len: usize) -> Result<Self, RoomIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(RoomIdError::InvalidChar(bad));
        }
        if trimmed.len() > max_len {
            return Err(RoomIdError::TooLong { max: max_len });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the signaling channel scoped to this room.
    pub fn channel_name(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-instance token stamped on every outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalIdentity(String);

impl LocalIdentity {
    pub fn generate() -> Self {
        Self(format!("peer_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_accepts_allowed_characters() {
        let room = RoomId::parse("  movie_night-42 ").expect("valid room");
        assert_eq!(room.as_str(), "movie_night-42");
        assert_eq!(room.channel_name(), "room-movie_night-42");
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(RoomId::parse(""), Err(RoomIdError::Empty));
        assert_eq!(RoomId::parse("   "), Err(RoomIdError::Empty));
    }

    #[test]
    fn rejects_characters_outside_allow_list() {
        assert_eq!(RoomId::parse("abc def"), Err(RoomIdError::InvalidChar(' ')));
        assert_eq!(RoomId::parse("room/../x"), Err(RoomIdError::InvalidChar('/')));
    }

    #[test]
    fn enforces_length_bound() {
        let long = "a".repeat(DEFAULT_ROOM_ID_MAX_LEN + 1);
        assert_eq!(
            RoomId::parse(&long),
            Err(RoomIdError::TooLong {
                max: DEFAULT_ROOM_ID_MAX_LEN
            })
        );
        assert!(RoomId::parse_bounded("abcd", 4).is_ok());
    }

    #[test]
    fn generated_identities_are_unique() {
        assert_ne!(LocalIdentity::generate(), LocalIdentity::generate());
    }
}
