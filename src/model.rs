use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{ParleyError, Result};

const MAX_USERNAME_LEN: usize = 64;

/// A participant name. Appears as the sender field of every record and as the
/// name of the participant's transfer directory, so it may not contain
/// whitespace, path separators or the `" : "` field boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty()
            || name.chars().count() > MAX_USERNAME_LEN
            || name == "."
            || name == ".."
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ParleyError::InvalidUsername(raw.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = ParleyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of the shared log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub sender: String,
    pub body: String,
}

impl Record {
    /// Stamp a new record from the local clock.
    pub fn new(sender: &Username, body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        if body.contains(['\n', '\r']) {
            return Err(ParleyError::InvalidMessage(
                "message must be a single line".into(),
            ));
        }
        Ok(Self {
            timestamp: codec::now(),
            sender: sender.as_str().to_string(),
            body,
        })
    }
}
