use time::OffsetDateTime;

/// Errors raised by the connection and trust engine.
///
/// Identity, authorization and not-found errors are caller mistakes and are
/// surfaced unchanged. Policy rejections are expected outcomes of the current
/// relationship or moderation state. `Conflict` marks a transaction that lost a
/// race for the write lock and can be retried as if it never ran.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("a pair needs two distinct positive user ids")]
    InvalidPair,

    #[error("cannot send a connection request to yourself")]
    SelfRequest,

    #[error("cannot block yourself")]
    SelfBlock,

    #[error("not authorized to act on this {0}")]
    NotAuthorized(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("interaction not allowed")]
    Blocked,

    #[error("chat cooldown active")]
    CooldownActive { until: OffsetDateTime },

    #[error("{0}")]
    InvalidInput(String),

    #[error("concurrent update conflict")]
    Conflict(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// A stored value that no longer maps onto the domain model.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Database(sqlx::Error::Decode(message.into().into()))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
        let busy = match &err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            sqlx::Error::PoolTimedOut => true,
            _ => false,
        };

        if busy {
            Self::Conflict(err)
        } else {
            Self::Database(err)
        }
    }
}
