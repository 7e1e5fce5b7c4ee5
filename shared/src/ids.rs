//! Connect codes identifying players to the matchmaking service.

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Maximum connect code length in characters, including the `#`.
pub const CONNECT_CODE_LENGTH: usize = 8;

/// Maximum length of the tag before the `#`.
const MAX_TAG_LENGTH: usize = 4;

/// A validated player connect code such as `ABCD#123`.
///
/// Rules:
/// - A tag of 1-4 ASCII uppercase letters or digits
/// - A single `#` separator
/// - 1-3 ASCII digits
/// - At most [`CONNECT_CODE_LENGTH`] characters in total
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectCode(String);

impl ConnectCode {
    /// Parse and validate a connect code.
    ///
    /// Lowercase letters are accepted and normalised to uppercase.
    pub fn parse(code: &str) -> Result<Self, ConnectCodeError> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ConnectCodeError::Empty);
        }
        if code.len() > CONNECT_CODE_LENGTH {
            return Err(ConnectCodeError::TooLong { len: code.len() });
        }

        let (tag, number) = code
            .split_once('#')
            .ok_or(ConnectCodeError::MissingSeparator)?;

        if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
            return Err(ConnectCodeError::InvalidTag(tag.to_string()));
        }
        if !tag.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(ConnectCodeError::InvalidTag(tag.to_string()));
        }
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConnectCodeError::InvalidNumber(number.to_string()));
        }

        Ok(Self(code))
    }

    /// The normalised code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag portion before the `#`.
    pub fn tag(&self) -> &str {
        self.0.split_once('#').map_or(self.0.as_str(), |(tag, _)| tag)
    }
}

impl std::fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ConnectCode {
    type Err = ConnectCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConnectCode {
    type Error = ConnectCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConnectCode> for String {
    fn from(code: ConnectCode) -> Self {
        code.0
    }
}

/// Reasons a connect code failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectCodeError {
    #[error("connect code is empty")]
    Empty,
    #[error("connect code is {len} characters (max {CONNECT_CODE_LENGTH})")]
    TooLong { len: usize },
    #[error("connect code is missing the '#' separator")]
    MissingSeparator,
    #[error("invalid connect code tag '{0}'")]
    InvalidTag(String),
    #[error("invalid connect code number '{0}'")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_codes() {
        assert_eq!(ConnectCode::parse("ABCD#123").unwrap().as_str(), "ABCD#123");
        assert_eq!(ConnectCode::parse("A#1").unwrap().as_str(), "A#1");
        assert_eq!(ConnectCode::parse("  fox#42 ").unwrap().as_str(), "FOX#42");
    }

    #[test]
    fn test_tag_accessor() {
        let code = ConnectCode::parse("MANG#0").unwrap();
        assert_eq!(code.tag(), "MANG");
    }

    #[test]
    fn test_rejects_missing_separator() {
        assert_eq!(
            ConnectCode::parse("ABCD123"),
            Err(ConnectCodeError::MissingSeparator)
        );
    }

    #[test]
    fn test_rejects_too_long() {
        assert!(matches!(
            ConnectCode::parse("ABCD#1234"),
            Err(ConnectCodeError::TooLong { len: 9 })
        ));
    }

    #[test]
    fn test_rejects_bad_parts() {
        assert!(matches!(
            ConnectCode::parse("AB-D#12"),
            Err(ConnectCodeError::InvalidTag(_))
        ));
        assert!(matches!(
            ConnectCode::parse("#12"),
            Err(ConnectCodeError::InvalidTag(_))
        ));
        assert!(matches!(
            ConnectCode::parse("ABC#1X"),
            Err(ConnectCodeError::InvalidNumber(_))
        ));
        assert_eq!(ConnectCode::parse(""), Err(ConnectCodeError::Empty));
    }

    #[test]
    fn test_serde_validates() {
        let code: ConnectCode = serde_json::from_str("\"abc#7\"").unwrap();
        assert_eq!(code.as_str(), "ABC#7");
        assert!(serde_json::from_str::<ConnectCode>("\"nope\"").is_err());
    }
}
