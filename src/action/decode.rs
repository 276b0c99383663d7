//! Inbound control message decoding
//!
//! Messages are URL-query encoded:
//!
//! ```text
//! action_type=add&ip=10.0.0.1,10.0.0.2&ip=10.0.0.3&timeout=300
//! ```
//!
//! `ip` may repeat and each value may be a comma-joined list; all fragments
//! are flattened in order. Only the first `action_type` and `timeout` count.

use std::num::ParseIntError;
use std::time::Duration;
use thiserror::Error;
use url::form_urlencoded;

/// A decoded control action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Block `ips` for `timeout`
    Add { ips: Vec<String>, timeout: Duration },
    /// Same as [`Action::Add`]
    Update { ips: Vec<String>, timeout: Duration },
    /// Remove `ips` from every shard and cancel their expiry
    Del { ips: Vec<String> },
    /// Flush every shard and forget every pending expiry
    Clear,
    /// Suspend expiry processing for `duration` (wire name `stop`)
    PauseExpiry { duration: Duration },
}

impl Action {
    /// Wire name of the action, used as log field and metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Add { .. } => "add",
            Action::Update { .. } => "update",
            Action::Del { .. } => "del",
            Action::Clear => "clear",
            Action::PauseExpiry { .. } => "stop",
        }
    }

    /// IPs the action refers to (empty for clear/stop)
    pub fn ips(&self) -> &[String] {
        match self {
            Action::Add { ips, .. } | Action::Update { ips, .. } | Action::Del { ips } => ips.as_slice(),
            Action::Clear | Action::PauseExpiry { .. } => &[],
        }
    }
}

/// Why an inbound message could not be turned into an [`Action`]
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message body is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("invalid percent escape at byte {position}")]
    InvalidEscape { position: usize },

    #[error("unrecognized action_type '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' requires at least one ip")]
    MissingIps { action: &'static str },

    #[error("action '{action}' requires a timeout")]
    MissingTimeout { action: &'static str },

    #[error("invalid timeout '{value}'")]
    InvalidTimeout {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl DecodeError {
    /// Unknown actions are skipped quietly rather than treated as malformed
    pub fn is_ignorable(&self) -> bool {
        matches!(self, DecodeError::UnknownAction(_))
    }

    /// Static label for the `reason` metric label
    pub fn reason_label(&self) -> &'static str {
        match self {
            DecodeError::NotUtf8(_) => "not_utf8",
            DecodeError::InvalidEscape { .. } => "invalid_escape",
            DecodeError::UnknownAction(_) => "unknown_action",
            DecodeError::MissingIps { .. } => "missing_ips",
            DecodeError::MissingTimeout { .. } => "missing_timeout",
            DecodeError::InvalidTimeout { .. } => "invalid_timeout",
        }
    }
}

/// Reject `%` not followed by two hex digits
fn check_escapes(body: &str) -> Result<(), DecodeError> {
    let bytes = body.as_bytes();
    for (position, _) in body.match_indices('%') {
        let valid = bytes
            .get(position + 1..position + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(DecodeError::InvalidEscape { position });
        }
    }
    Ok(())
}

fn parse_seconds(value: &str) -> Result<Duration, DecodeError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|source| DecodeError::InvalidTimeout {
            value: value.to_string(),
            source,
        })
}

/// Decode one raw queue message
pub fn decode(raw: &[u8]) -> Result<Action, DecodeError> {
    let body = std::str::from_utf8(raw)?;
    check_escapes(body)?;

    let mut action_type: Option<String> = None;
    let mut timeout: Option<String> = None;
    let mut ips: Vec<String> = Vec::new();

    for (key, value) in form_urlencoded::parse(body.as_bytes()) {
        match &*key {
            "action_type" if action_type.is_none() => action_type = Some(value.into_owned()),
            "timeout" if timeout.is_none() => timeout = Some(value.into_owned()),
            "ip" => ips.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|fragment| !fragment.is_empty())
                    .map(str::to_string),
            ),
            _ => {}
        }
    }

    let seconds = |action: &'static str| -> Result<Duration, DecodeError> {
        timeout
            .as_deref()
            .ok_or(DecodeError::MissingTimeout { action })
            .and_then(parse_seconds)
    };
    let non_empty = |action: &'static str, ips: Vec<String>| {
        if ips.is_empty() {
            Err(DecodeError::MissingIps { action })
        } else {
            Ok(ips)
        }
    };

    match action_type.as_deref().unwrap_or_default() {
        "add" => Ok(Action::Add {
            timeout: seconds("add")?,
            ips: non_empty("add", ips)?,
        }),
        "update" => Ok(Action::Update {
            timeout: seconds("update")?,
            ips: non_empty("update", ips)?,
        }),
        "del" => Ok(Action::Del {
            ips: non_empty("del", ips)?,
        }),
        "clear" => Ok(Action::Clear),
        "stop" => Ok(Action::PauseExpiry {
            duration: seconds("stop")?,
        }),
        other => Err(DecodeError::UnknownAction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_add_with_flattened_ips() {
        let action = decode(b"action_type=add&ip=10.0.0.1,10.0.0.2&ip=10.0.0.3&timeout=300").unwrap();
        assert_eq!(
            action,
            Action::Add {
                ips: vec![
                    "10.0.0.1".to_string(),
                    "10.0.0.2".to_string(),
                    "10.0.0.3".to_string()
                ],
                timeout: Duration::from_secs(300),
            }
        );
        assert_eq!(action.kind(), "add");
    }

    #[test]
    fn percent_encoded_commas_are_split_too() {
        let action = decode(b"action_type=del&ip=10.0.0.1%2C10.0.0.2").unwrap();
        assert_eq!(action.ips(), ["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn empty_fragments_and_whitespace_are_dropped() {
        let action = decode(b"action_type=del&ip=,10.0.0.1,+,10.0.0.2,").unwrap();
        assert_eq!(action.ips(), ["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn update_matches_add_semantics() {
        let action = decode(b"action_type=update&ip=10.0.0.1&timeout=5").unwrap();
        assert!(matches!(action, Action::Update { ref ips, timeout }
            if ips == &["10.0.0.1"] && timeout == Duration::from_secs(5)));
    }

    #[test]
    fn clear_needs_no_fields() {
        assert_eq!(decode(b"action_type=clear").unwrap(), Action::Clear);
        assert!(decode(b"action_type=clear").unwrap().ips().is_empty());
    }

    #[test]
    fn stop_carries_pause_duration() {
        let action = decode(b"action_type=stop&timeout=60").unwrap();
        assert_eq!(
            action,
            Action::PauseExpiry {
                duration: Duration::from_secs(60)
            }
        );
        assert_eq!(action.kind(), "stop");
    }

    #[test]
    fn first_action_type_and_timeout_win() {
        let action = decode(b"action_type=del&action_type=clear&ip=10.0.0.1&timeout=1&timeout=2").unwrap();
        assert_eq!(action.kind(), "del");

        let action = decode(b"timeout=7&timeout=9&action_type=stop").unwrap();
        assert_eq!(
            action,
            Action::PauseExpiry {
                duration: Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn unknown_and_missing_action_types_are_ignorable() {
        let err = decode(b"action_type=explode&ip=10.0.0.1").unwrap_err();
        assert!(err.is_ignorable());
        assert!(err.to_string().contains("explode"));

        let err = decode(b"ip=10.0.0.1&timeout=5").unwrap_err();
        assert!(err.is_ignorable());
    }

    #[test]
    fn malformed_messages_are_not_ignorable() {
        let cases: &[(&[u8], &str)] = &[
            (b"action_type=add&ip=10.0.0.1&timeout=%zz", "invalid_escape"),
            (b"action_type=add&ip=10.0.0.1%", "invalid_escape"),
            (b"action_type=add&ip=\xff\xfe", "not_utf8"),
            (b"action_type=add&timeout=5", "missing_ips"),
            (b"action_type=del", "missing_ips"),
            (b"action_type=add&ip=10.0.0.1", "missing_timeout"),
            (b"action_type=stop", "missing_timeout"),
            (b"action_type=add&ip=10.0.0.1&timeout=soon", "invalid_timeout"),
            (b"action_type=add&ip=10.0.0.1&timeout=-5", "invalid_timeout"),
        ];

        for (raw, reason) in cases {
            let err = decode(raw).unwrap_err();
            assert!(!err.is_ignorable(), "{reason} must not be ignorable");
            assert_eq!(err.reason_label(), *reason, "wrong reason for {:?}", String::from_utf8_lossy(raw));
        }
    }

    #[test]
    fn escape_check_accepts_valid_sequences() {
        assert!(check_escapes("a%2Cb%2c").is_ok());
        assert!(matches!(
            check_escapes("ok%2"),
            Err(DecodeError::InvalidEscape { position: 2 })
        ));
    }
}
