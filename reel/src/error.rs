//! Error type shared by the joiner, the reducers and the bus boundary.
//!
//! A [`ReelError`] is classified by an [`ErrorKind`] and remembers where it was raised. When
//! several workers fail together their errors are folded into a single aggregated value.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use serde_json::error::Category;

/// Result type used across the crate.
pub type ReelResult<T> = Result<T, ReelError>;

type Source = Arc<dyn error::Error + Send + Sync>;

/// Classification of the failures a stage can run into.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Payloads
    DeserializationError,
    SerializationError,
    InvalidData,
    ProtocolViolation,

    // Session bounds
    PendingBufferOverflow,
    SessionLimitExceeded,

    // Bus
    BusPublishFailed,
    BusAckFailed,
    BusQueueMissing,
    BusClosed,

    // Workers
    InvalidState,
    WorkerPanic,
    WorkerCancelled,

    ConfigError,
    IoError,
    Unknown,
}

#[derive(Debug, Clone)]
struct Failure {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<Cow<'static, str>>,
    source: Option<Source>,
    raised_at: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

#[derive(Debug, Clone)]
enum Inner {
    One(Box<Failure>),
    Aggregated {
        errors: Vec<ReelError>,
        raised_at: &'static Location<'static>,
    },
}

/// Error returned by every fallible operation of the crate.
#[derive(Debug, Clone)]
pub struct ReelError {
    inner: Inner,
}

impl ReelError {
    #[track_caller]
    fn new(kind: ErrorKind, description: &'static str, detail: Option<Cow<'static, str>>) -> Self {
        ReelError {
            inner: Inner::One(Box::new(Failure {
                kind,
                description,
                detail,
                source: None,
                raised_at: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            })),
        }
    }

    /// Kind of the error, or of the first aggregated one.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            Inner::One(failure) => failure.kind,
            Inner::Aggregated { errors, .. } => {
                errors.first().map_or(ErrorKind::Unknown, ReelError::kind)
            }
        }
    }

    /// Every kind contained in this error, flattening aggregations in order.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.inner {
            Inner::One(failure) => vec![failure.kind],
            Inner::Aggregated { errors, .. } => errors.iter().flat_map(ReelError::kinds).collect(),
        }
    }

    /// Dynamic detail attached when the error was raised, if any.
    pub fn detail(&self) -> Option<&str> {
        match &self.inner {
            Inner::One(failure) => failure.detail.as_deref(),
            Inner::Aggregated { errors, .. } => errors.iter().find_map(ReelError::detail),
        }
    }

    /// Attaches the error that caused this one. Ignored on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let Inner::One(failure) = &mut self.inner {
            failure.source = Some(Arc::new(source));
        }

        self
    }
}

/// Two errors are equal when they carry the same kinds in the same shape.
impl PartialEq for ReelError {
    fn eq(&self, other: &ReelError) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::One(a), Inner::One(b)) => a.kind == b.kind,
            (Inner::Aggregated { errors: a, .. }, Inner::Aggregated { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Writes `text` under `label`, indenting every line by `indent`.
fn write_block(f: &mut fmt::Formatter<'_>, indent: &str, label: &str, text: &str) -> fmt::Result {
    write!(f, "\n{indent}{label}:")?;
    for line in text.lines() {
        write!(f, "\n{indent}  {}", line.trim_end())?;
    }

    Ok(())
}

fn write_location(f: &mut fmt::Formatter<'_>, location: &Location<'_>) -> fmt::Result {
    write!(
        f,
        " @ {}:{}:{}",
        location.file(),
        location.line(),
        location.column()
    )
}

impl fmt::Display for ReelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::One(failure) => {
                write!(f, "[{:?}] {}", failure.kind, failure.description)?;
                write_location(f, failure.raised_at)?;

                if let Some(detail) = failure.detail.as_deref() {
                    write_block(f, "  ", "Detail", detail)?;
                }

                let backtrace = failure.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_block(f, "  ", "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            Inner::Aggregated { errors, raised_at } => {
                let plural = if errors.len() == 1 { "" } else { "s" };
                write!(f, "[Many] {} error{plural} aggregated", errors.len())?;
                write_location(f, raised_at)?;

                for (position, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", position + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {}", line.trim_end())?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for ReelError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.inner {
            Inner::One(failure) => failure
                .source
                .as_deref()
                .map(|source| source as &(dyn error::Error + 'static)),
            Inner::Aggregated { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for ReelError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> ReelError {
        ReelError::new(kind, description, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for ReelError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> ReelError {
        ReelError::new(kind, description, Some(detail.into()))
    }
}

/// Folds worker failures into one error. A single failure is returned unwrapped.
impl<E> From<Vec<E>> for ReelError
where
    E: Into<ReelError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> ReelError {
        let raised_at = Location::caller();
        let mut errors: Vec<ReelError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.remove(0);
        }

        ReelError {
            inner: Inner::Aggregated { errors, raised_at },
        }
    }
}

impl From<std::io::Error> for ReelError {
    #[track_caller]
    fn from(err: std::io::Error) -> ReelError {
        ReelError::new(ErrorKind::IoError, "I/O failed", Some(err.to_string().into()))
            .with_source(err)
    }
}

impl From<serde_json::Error> for ReelError {
    #[track_caller]
    fn from(err: serde_json::Error) -> ReelError {
        let (kind, description) = match err.classify() {
            Category::Io => (ErrorKind::IoError, "JSON I/O failed"),
            Category::Syntax | Category::Data | Category::Eof => {
                (ErrorKind::DeserializationError, "JSON decoding failed")
            }
        };

        ReelError::new(kind, description, Some(err.to_string().into())).with_source(err)
    }
}

impl From<reel_config::shared::ValidationError> for ReelError {
    #[track_caller]
    fn from(err: reel_config::shared::ValidationError) -> ReelError {
        ReelError::new(
            ErrorKind::ConfigError,
            "Invalid configuration",
            Some(err.to_string().into()),
        )
        .with_source(err)
    }
}
