use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag is empty")]
    Empty,
    #[error("tag {0:?} contains characters outside A-Z and 0-9")]
    InvalidChar(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    pub fn parse(raw: &str) -> Result<Self, TagError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix('#').unwrap_or(trimmed).trim();
        if body.is_empty() {
            return Err(TagError::Empty);
        }
        if !body.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(TagError::InvalidChar(raw.to_string()));
        }
        Ok(Self(body.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segment for the game API, e.g. `%232PP`.
    pub fn url_segment(&self) -> String {
        format!("%23{}", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = TagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_hash_and_case() {
        let a = Tag::parse("#2ppq").unwrap();
        let b = Tag::parse("  2PPQ ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "#2PPQ");
        assert_eq!(a.url_segment(), "%232PPQ");
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert_eq!(Tag::parse(""), Err(TagError::Empty));
        assert_eq!(Tag::parse("#"), Err(TagError::Empty));
        assert!(matches!(Tag::parse("#AB-C"), Err(TagError::InvalidChar(_))));
    }
}
