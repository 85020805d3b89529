use serde::Serialize;
use thiserror::Error;

pub type RoomResult<T> = Result<T, RoomError>;

/// Everything a room command can be refused with.
///
/// These never tear down a connection or a room; the command boundary turns
/// them into an `error` event for the connection that sent the command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("room {0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    DuplicateAction(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("room is temporarily unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    InvalidState,
    Validation,
    DuplicateAction,
    Storage,
    Unavailable,
}

impl RoomError {
    pub fn kind(&self) -> ErrorKind {
        use RoomError::*;
        match self {
            Authentication(_) => ErrorKind::Authentication,
            Authorization(_) => ErrorKind::Authorization,
            NotFound(_) => ErrorKind::NotFound,
            InvalidState(_) => ErrorKind::InvalidState,
            Validation(_) => ErrorKind::Validation,
            DuplicateAction(_) => ErrorKind::DuplicateAction,
            Storage(_) => ErrorKind::Storage,
            Unavailable => ErrorKind::Unavailable,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_snake_case() {
        let kind = RoomError::DuplicateAction("already voted".into()).kind();
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"duplicate_action\"");
        assert_eq!(
            serde_json::to_string(&RoomError::NotFound("x".into()).kind()).unwrap(),
            "\"not_found\""
        );
    }

    #[test]
    fn display_keeps_detail() {
        assert_eq!(
            RoomError::Authorization("only the host can end this room".into()).to_string(),
            "not allowed: only the host can end this room"
        );
    }
}
