//! Room codes: short identifiers users type or paste to join a room.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of every generated room code.
pub const ROOM_CODE_LEN: usize = 6;

const ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
    'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("malformed room code: {0:?}")]
    Malformed(String),
}

/// A lowercase base-36 room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// A fresh random code. Uniqueness is the caller's concern.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(ROOM_CODE_LEN, &ALPHABET))
    }

    /// Parses user input: surrounding whitespace is ignored and letters are
    /// case-insensitive.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RoomCodeError::Empty);
        }
        let code = trimmed.to_ascii_lowercase();
        if code.len() != ROOM_CODE_LEN || !code.chars().all(|c| ALPHABET.contains(&c)) {
            return Err(RoomCodeError::Malformed(trimmed.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}
