//! Shorthands for raising [`crate::error::ReelError`].

/// Builds a [`crate::error::ReelError`] from a kind, a static description and, optionally, a
/// detail rendered with `to_string` and the error that caused it.
///
/// ```ignore
/// reel_error!(ErrorKind::InvalidData, "Empty relation");
/// reel_error!(ErrorKind::ProtocolViolation, "Duplicate terminal", format!("client {id}"));
/// reel_error!(ErrorKind::SerializationError, "Encoding failed", err.to_string(), source: err);
/// ```
#[macro_export]
macro_rules! reel_error {
    ($kind:expr, $desc:expr $(,)?) => {
        $crate::error::ReelError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr $(,)?) => {
        $crate::error::ReelError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr $(,)?) => {
        $crate::error::ReelError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with the error [`reel_error!`] builds from the same arguments.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::reel_error!($($arg)+))
    };
}
