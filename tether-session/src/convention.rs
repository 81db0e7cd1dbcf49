//! Key naming for sessions held in the store.
//!
//! A session `abc` under prefix `TOMCAT_SESSION` lives in two hashes:
//!
//! - `TOMCAT_SESSION:abc:metadata` holds the fields in [`fields`]
//! - `TOMCAT_SESSION:abc:attributes` holds one field per attribute
//!
//! Statistics are plain string keys under the same prefix, e.g.
//! `TOMCAT_SESSION:CURRENT_ACTIVE`.

use crate::error::{SessionError, SessionResult};

const DELIMITER: char = ':';
const METADATA_SUFFIX: &str = ":metadata";
const ATTRIBUTES_SUFFIX: &str = ":attributes";

/// Metadata hash field names.
pub mod fields {
    pub const IS_VALID: &str = "IS_VALID";
    pub const CREATION_TIME: &str = "CREATION_TIME";
    pub const LAST_REQUEST_START_TIME: &str = "LAST_REQUEST_START_TIME";
    pub const LAST_REQUEST_END_TIME: &str = "LAST_REQUEST_END_TIME";
    /// Max inactive interval in seconds
    pub const TTL: &str = "TTL";
    pub const EXPIRED_AT: &str = "EXPIRED_AT";
    pub const AUTH_TYPE: &str = "AUTH_TYPE";
    pub const PRINCIPAL: &str = "PRINCIPAL";
}

/// Statistics maintained by the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    ExpiredSessions,
    /// Seconds
    MaxAliveTime,
    MaxActive,
    CurrentActive,
    /// Seconds
    AverageAliveTime,
    /// Sessions per minute
    SessionCreateRate,
    /// Sessions per minute
    SessionExpireRate,
}

impl Statistic {
    /// Every statistic.
    pub const ALL: [Statistic; 7] = [
        Self::ExpiredSessions,
        Self::MaxAliveTime,
        Self::MaxActive,
        Self::CurrentActive,
        Self::AverageAliveTime,
        Self::SessionCreateRate,
        Self::SessionExpireRate,
    ];

    /// The key suffix used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiredSessions => "EXPIRED_SESSIONS",
            Self::MaxAliveTime => "MAX_ALIVE_TIME",
            Self::MaxActive => "MAX_ACTIVE",
            Self::CurrentActive => "CURRENT_ACTIVE",
            Self::AverageAliveTime => "AVERAGE_ALIVE_TIME",
            Self::SessionCreateRate => "SESSION_CREATE_RATE",
            Self::SessionExpireRate => "SESSION_EXPIRE_RATE",
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps session ids to store keys and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convention {
    prefix: String,
    /// `<prefix>:`
    head: String,
}

impl Default for Convention {
    fn default() -> Self {
        Self {
            prefix: "TOMCAT_SESSION".to_string(),
            head: format!("TOMCAT_SESSION{}", DELIMITER),
        }
    }
}

impl Convention {
    /// Create a convention for `prefix`.
    pub fn new(prefix: &str) -> SessionResult<Self> {
        if prefix.is_empty() {
            return Err(SessionError::Config("key prefix must not be empty".to_string()));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            head: format!("{}{}", prefix, DELIMITER),
        })
    }

    /// The key prefix, without its delimiter.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Metadata hash key for a session.
    pub fn metadata_key(&self, session_id: &str) -> SessionResult<String> {
        check_id(session_id)?;
        Ok(format!("{}{}{}", self.head, session_id, METADATA_SUFFIX))
    }

    /// Attributes hash key for a session.
    pub fn attributes_key(&self, session_id: &str) -> SessionResult<String> {
        check_id(session_id)?;
        Ok(format!("{}{}{}", self.head, session_id, ATTRIBUTES_SUFFIX))
    }

    /// Recover the session id from a metadata key.
    pub fn session_id_from_metadata_key(&self, key: &str) -> SessionResult<String> {
        self.extract_id(key, METADATA_SUFFIX)
    }

    /// Recover the session id from an attributes key.
    pub fn session_id_from_attributes_key(&self, key: &str) -> SessionResult<String> {
        self.extract_id(key, ATTRIBUTES_SUFFIX)
    }

    /// Glob matching every metadata key.
    pub fn metadata_pattern(&self) -> String {
        format!("{}*{}", escape_glob(&self.head), METADATA_SUFFIX)
    }

    /// Glob matching every attributes key.
    pub fn attributes_pattern(&self) -> String {
        format!("{}*{}", escape_glob(&self.head), ATTRIBUTES_SUFFIX)
    }

    /// Key holding a statistic.
    pub fn statistic_key(&self, statistic: Statistic) -> String {
        format!("{}{}", self.head, statistic.as_str())
    }

    /// Every `(old key, new key)` rename needed to move a session to a new id.
    pub fn change_id_mapping(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> SessionResult<Vec<(String, String)>> {
        Ok(vec![
            (self.metadata_key(old_id)?, self.metadata_key(new_id)?),
            (self.attributes_key(old_id)?, self.attributes_key(new_id)?),
        ])
    }

    fn extract_id(&self, key: &str, suffix: &str) -> SessionResult<String> {
        key.strip_prefix(self.head.as_str())
            .and_then(|rest| rest.strip_suffix(suffix))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SessionError::InvalidKey(key.to_string()))
    }
}

fn check_id(session_id: &str) -> SessionResult<()> {
    if session_id.is_empty() {
        return Err(SessionError::InvalidSessionId(
            "session id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
