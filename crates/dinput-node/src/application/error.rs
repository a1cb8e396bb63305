//! Error types shared by the source and sink session controllers.

use dinput_core::protocol::messages::status;
use thiserror::Error;

/// Outcome of a sharing request that did not succeed.
///
/// Refusals (`AlreadyPending`, `NotPrepared`, `ChannelOpenError`,
/// `SendFailed`) are returned synchronously by the controller.
/// `Disconnected` and the status-derived variants arrive later through the
/// request's completion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SharingError {
    /// The transport could not open a channel to the peer.
    #[error("could not open channel: {0}")]
    ChannelOpenError(String),

    /// A request with the same correlation key is already outstanding.
    #[error("an identical request is already pending")]
    AlreadyPending,

    /// The peer has not been prepared (no session exists).
    #[error("peer is not prepared")]
    NotPrepared,

    /// The sink has no switch for the requesting session.
    #[error("sink has no switch for this session")]
    SwitchNotFound,

    /// The channel closed before the answer arrived.
    #[error("peer disconnected")]
    Disconnected,

    /// The transport rejected an outgoing frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The sink lost access to its hardware.
    #[error("sink could not start capturing")]
    CaptureFailed,

    /// The remote side answered with a status code not covered above.
    #[error("remote rejected the request with status {code}")]
    Rejected { code: i32 },
}

impl SharingError {
    /// Wire status code used when this error is reported to another node.
    pub fn status_code(&self) -> i32 {
        match self {
            SharingError::ChannelOpenError(_) => status::CHANNEL_OPEN_FAILED,
            SharingError::AlreadyPending => status::ALREADY_PENDING,
            SharingError::NotPrepared => status::NOT_PREPARED,
            SharingError::SwitchNotFound => status::SWITCH_NOT_FOUND,
            SharingError::Disconnected => status::DISCONNECTED,
            SharingError::SendFailed(_) => status::SEND_FAILED,
            SharingError::CaptureFailed => status::CAPTURE_FAILED,
            SharingError::Rejected { code } => *code,
        }
    }

    /// Interprets a wire status code.  `status::OK` maps to `Ok(())`.
    pub fn check_status(code: i32) -> Result<(), SharingError> {
        let err = match code {
            status::OK => return Ok(()),
            status::NOT_PREPARED => SharingError::NotPrepared,
            status::SWITCH_NOT_FOUND => SharingError::SwitchNotFound,
            status::ALREADY_PENDING => SharingError::AlreadyPending,
            status::CHANNEL_OPEN_FAILED => {
                SharingError::ChannelOpenError("reported by relay node".to_string())
            }
            status::SEND_FAILED => SharingError::SendFailed("reported by relay node".to_string()),
            status::DISCONNECTED => SharingError::Disconnected,
            status::CAPTURE_FAILED => SharingError::CaptureFailed,
            other => SharingError::Rejected { code: other },
        };
        Err(err)
    }
}

/// Errors raised by the hardware collector or the event injector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    #[error("capture could not be started: {0}")]
    CaptureUnavailable(String),
    #[error("event injection failed: {0}")]
    InjectFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_status_is_success() {
        assert_eq!(SharingError::check_status(status::OK), Ok(()));
    }

    #[test]
    fn test_known_statuses_map_to_their_variants() {
        assert_eq!(
            SharingError::check_status(status::SWITCH_NOT_FOUND),
            Err(SharingError::SwitchNotFound)
        );
        assert_eq!(
            SharingError::check_status(status::DISCONNECTED),
            Err(SharingError::Disconnected)
        );
    }

    #[test]
    fn test_unknown_status_is_kept_verbatim() {
        assert_eq!(
            SharingError::check_status(-99),
            Err(SharingError::Rejected { code: -99 })
        );
        assert_eq!(SharingError::Rejected { code: -99 }.status_code(), -99);
    }

    #[test]
    fn test_status_code_round_trips_for_every_named_error() {
        let errors = [
            SharingError::AlreadyPending,
            SharingError::NotPrepared,
            SharingError::SwitchNotFound,
            SharingError::Disconnected,
            SharingError::CaptureFailed,
        ];
        for err in errors {
            assert_eq!(SharingError::check_status(err.status_code()), Err(err));
        }
    }
}
