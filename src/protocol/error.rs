use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::message::{Message, MessageError, MessageObject, MessageValue};

use super::ERROR;

/// Every error kind the protocol can carry.
///
/// The position of a kind in [`ErrorKind::ALL`] is its wire ordinal, so new
/// kinds are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    VersionMismatch,
    NotLoggedIn,
    SessionInvalid,
    LoginFailed,
    Syntax,
    Format,
    UnknownMessage,
    OutOfOrder,
    UnknownPlayer,
    UnknownPlanet,
    UnknownFleet,
    UnknownBuilding,
    UnknownResearch,
    UnknownShipDesign,
    InsufficientCredits,
    InsufficientMinerals,
    InsufficientEnergy,
    InsufficientPopulation,
    NotReady,
    ServerBug,
    Interrupted,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 22] = [
        ErrorKind::Unknown,
        ErrorKind::VersionMismatch,
        ErrorKind::NotLoggedIn,
        ErrorKind::SessionInvalid,
        ErrorKind::LoginFailed,
        ErrorKind::Syntax,
        ErrorKind::Format,
        ErrorKind::UnknownMessage,
        ErrorKind::OutOfOrder,
        ErrorKind::UnknownPlayer,
        ErrorKind::UnknownPlanet,
        ErrorKind::UnknownFleet,
        ErrorKind::UnknownBuilding,
        ErrorKind::UnknownResearch,
        ErrorKind::UnknownShipDesign,
        ErrorKind::InsufficientCredits,
        ErrorKind::InsufficientMinerals,
        ErrorKind::InsufficientEnergy,
        ErrorKind::InsufficientPopulation,
        ErrorKind::NotReady,
        ErrorKind::ServerBug,
        ErrorKind::Interrupted,
    ];

    pub fn ordinal(self) -> i64 {
        self as i64
    }

    /// Unmapped ordinals decode as [`ErrorKind::Unknown`].
    pub fn from_ordinal(ordinal: i64) -> Self {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::VersionMismatch => "VERSION_MISMATCH",
            ErrorKind::NotLoggedIn => "NOT_LOGGED_IN",
            ErrorKind::SessionInvalid => "SESSION_INVALID",
            ErrorKind::LoginFailed => "LOGIN_FAILED",
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Format => "FORMAT",
            ErrorKind::UnknownMessage => "UNKNOWN_MESSAGE",
            ErrorKind::OutOfOrder => "OUT_OF_ORDER",
            ErrorKind::UnknownPlayer => "UNKNOWN_PLAYER",
            ErrorKind::UnknownPlanet => "UNKNOWN_PLANET",
            ErrorKind::UnknownFleet => "UNKNOWN_FLEET",
            ErrorKind::UnknownBuilding => "UNKNOWN_BUILDING",
            ErrorKind::UnknownResearch => "UNKNOWN_RESEARCH",
            ErrorKind::UnknownShipDesign => "UNKNOWN_SHIP_DESIGN",
            ErrorKind::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorKind::InsufficientMinerals => "INSUFFICIENT_MINERALS",
            ErrorKind::InsufficientEnergy => "INSUFFICIENT_ENERGY",
            ErrorKind::InsufficientPopulation => "INSUFFICIENT_POPULATION",
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::ServerBug => "SERVER_BUG",
            ErrorKind::Interrupted => "INTERRUPTED",
        }
    }

    /// Reads a wire `code`: an ordinal, a name, or anything else as `Unknown`.
    pub fn from_code(code: &MessageValue) -> Self {
        match code {
            MessageValue::Integer(i) => Self::from_ordinal(*i),
            MessageValue::String(s) => s.parse().unwrap_or(ErrorKind::Unknown),
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown error kind '{0}'")]
pub struct UnknownErrorKind(String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

/// A typed protocol failure, sent to the peer as `ERROR{code=..,message=..}`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[{kind}] {message}")]
pub struct ProtocolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn to_object(&self) -> MessageObject {
        let mut object = MessageObject::from_token(Some(ERROR.to_string()));
        object.insert_parsed("code".to_string(), self.kind.ordinal().into());
        object.insert_parsed("message".to_string(), self.message.as_str().into());
        object
    }

    /// Returns `Some` if `object` is a reserved `ERROR` message. Missing or
    /// malformed fields never fail the conversion.
    pub fn from_object(object: &MessageObject) -> Option<Self> {
        if !object.is(ERROR) {
            return None;
        }

        let kind = object
            .get("code")
            .map_or(ErrorKind::Unknown, ErrorKind::from_code);
        let message = object.get_string_or("message", "").unwrap_or_default();
        Some(Self::new(kind, message))
    }

    pub fn from_message(message: &Message) -> Option<Self> {
        message.as_object().and_then(Self::from_object)
    }
}

impl From<ProtocolError> for Message {
    fn from(value: ProtocolError) -> Self {
        Message::Object(value.to_object())
    }
}

impl From<MessageError> for ProtocolError {
    fn from(value: MessageError) -> Self {
        ProtocolError::new(ErrorKind::Format, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_and_names_are_bijective() {
        for (i, kind) in ErrorKind::ALL.iter().copied().enumerate() {
            assert_eq!(kind.ordinal(), i as i64);
            assert_eq!(ErrorKind::from_ordinal(i as i64), kind);
            assert_eq!(kind.name().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_codes_map_to_unknown() {
        assert_eq!(ErrorKind::from_ordinal(-1), ErrorKind::Unknown);
        assert_eq!(ErrorKind::from_ordinal(10_000), ErrorKind::Unknown);
        assert_eq!(
            ErrorKind::from_code(&MessageValue::from("NOT_A_KIND")),
            ErrorKind::Unknown
        );
        assert_eq!(
            ErrorKind::from_code(&MessageValue::Boolean(true)),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn error_object_on_the_wire() {
        let error = ProtocolError::new(ErrorKind::SessionInvalid, "stale session");
        let text = Message::from(error.clone()).to_wire().unwrap();

        assert_eq!(text, r#"ERROR{code=3,message="stale session"}"#);
        let parsed = Message::parse(&text).unwrap();
        assert_eq!(ProtocolError::from_message(&parsed), Some(error));
    }

    #[test]
    fn error_code_by_name() {
        let parsed = Message::parse(r#"ERROR{code="NOT_READY",message="later"}"#).unwrap();
        let error = ProtocolError::from_message(&parsed).unwrap();

        assert_eq!(error.kind, ErrorKind::NotReady);
        assert_eq!(error.message, "later");
    }

    #[test]
    fn malformed_error_objects_still_decode() {
        let parsed = Message::parse("ERROR{code=[1]}").unwrap();
        let error = ProtocolError::from_message(&parsed).unwrap();

        assert_eq!(error.kind, ErrorKind::Unknown);
        assert_eq!(error.message, "");
    }

    #[test]
    fn other_messages_are_not_errors() {
        assert!(ProtocolError::from_message(&Message::parse("PONG{}").unwrap()).is_none());
    }
}
