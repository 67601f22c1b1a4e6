use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input, or `start_time >= end_time`.
    Validation(String),
    /// The candidate overlaps this live reservation.
    Conflict(Ulid),
    NotFound(Ulid),
    LimitExceeded(&'static str),
    /// Persistence failure; nothing was committed.
    Store(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid reservation: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "slot already taken: conflicts with reservation {id}")
            }
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

