use thiserror::Error;

/// Errors that can occur when waiting on or configuring a synchronization primitive.
///
/// Timing out is not an error: a wait that times out reports `false`.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The caller provided a value that the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A blocking wait was interrupted while it was still pending.
    ///
    /// The wait was withdrawn before returning this, so nothing was consumed on the
    /// caller's behalf.
    #[error("blocking wait was interrupted while still pending")]
    Interrupted,

    /// A future-based wait was cancelled before it completed.
    #[error("wait was cancelled before it completed")]
    Cancelled,
}

/// A specialized `Result` type for latchkey operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Copy);

    #[test]
    fn display_writes_message() {
        for error in [
            Error::InvalidArgument("permits"),
            Error::Interrupted,
            Error::Cancelled,
        ] {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn invalid_argument_names_the_argument() {
        let error = Error::InvalidArgument("initial permit count must not be negative");
        assert!(error.to_string().contains("initial permit count"));
    }
}
