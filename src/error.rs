//! Crate-wide error taxonomy and the status codes reported to a host.

use thiserror::Error;

/// Failure modes of the modem and link layer.
///
/// Every fallible operation in the crate returns `Result<_, Error>`; callers
/// can rely on the variants to distinguish "card never answered" from "card
/// answered garbage" from "we were told to stop".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No signal or reply arrived within the configured deadline.
    #[error("no reply within the frame waiting time")]
    Timeout,
    /// A response arrived but failed checksum verification.
    #[error("response failed checksum verification")]
    Checksum,
    /// A response arrived but its length does not fit the protocol step.
    #[error("response length does not fit the protocol step")]
    Length,
    /// A structurally valid response carried unexpected content.
    #[error("unexpected response content")]
    UnexpectedResponse,
    /// A frame or symbol buffer filled up before the frame ended.
    #[error("frame buffer exhausted")]
    Overflow,
    /// The operation was cancelled by the operator or host.
    #[error("operation cancelled")]
    Aborted,
    /// The request cannot be served in the current session state.
    #[error("operation not supported in this state")]
    Unsupported,
    /// A nested exchange failed while honouring a waiting-time extension.
    #[error("nested exchange failed during waiting time extension")]
    Exchange,
    /// The carrier field is not energised.
    #[error("field is not energised")]
    FieldOff,
}

/// Status code attached to every host-facing reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The requested action completed.
    Success = 0,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::Checksum`].
    Checksum,
    /// See [`Error::Length`].
    Length,
    /// See [`Error::UnexpectedResponse`].
    UnexpectedResponse,
    /// See [`Error::Overflow`].
    Overflow,
    /// See [`Error::Aborted`].
    Aborted,
    /// See [`Error::Unsupported`].
    Unsupported,
    /// See [`Error::Exchange`].
    CardExchange,
    /// See [`Error::FieldOff`].
    FieldOff,
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout => Status::Timeout,
            Error::Checksum => Status::Checksum,
            Error::Length => Status::Length,
            Error::UnexpectedResponse => Status::UnexpectedResponse,
            Error::Overflow => Status::Overflow,
            Error::Aborted => Status::Aborted,
            Error::Unsupported => Status::Unsupported,
            Error::Exchange => Status::CardExchange,
            Error::FieldOff => Status::FieldOff,
        }
    }
}

impl From<Result<(), Error>> for Status {
    fn from(r: Result<(), Error>) -> Self {
        match r {
            Ok(()) => Status::Success,
            Err(e) => e.into(),
        }
    }
}
