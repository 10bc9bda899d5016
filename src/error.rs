//! Typed protocol outcomes.
//!
//! Every fallible call returns `anyhow::Result`; the variants here travel inside the
//! `anyhow::Error` so callers can classify a failure with
//! `err.downcast_ref::<CastError>()`.

pub use anyhow::Error;
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CastError {
    /// An operation was attempted without the state it depends on,
    /// e.g. a media command before any media session is known.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The device answered `INVALID_REQUEST`.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The device answered `LAUNCH_ERROR`.
    #[error("launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("load failed")]
    LoadFailed,

    #[error("load cancelled")]
    LoadCancelled,

    #[error("invalid player state")]
    InvalidPlayerState,

    /// The heartbeat watchdog fired; the connection is considered dead.
    #[error("device timeout")]
    Timeout,

    /// A caller-level deadline elapsed before the device answered.
    #[error("request timed out")]
    RequestTimeout,

    /// The controller was closed while the request was in flight.
    #[error("request cancelled: controller closed")]
    Cancelled,

    #[error("channel closed")]
    ChannelClosed,
}

impl CastError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> CastError {
        CastError::InvalidState(msg.into())
    }
}

/// Returns the `CastError` carried by `err`, if any.
pub fn classify(err: &Error) -> Option<&CastError> {
    err.downcast_ref::<CastError>()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify_through_context() {
        let err = Error::from(CastError::LaunchFailed { reason: "NOT_FOUND".into() })
            .context("launching app");

        assert_eq!(classify(&err),
                   Some(&CastError::LaunchFailed { reason: "NOT_FOUND".into() }));
        assert_eq!(format!("{:#}", err), "launching app: launch failed: NOT_FOUND");
    }
}
