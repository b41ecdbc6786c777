/// Errors surfaced by control-surface operations.
///
/// The audio path itself never propagates errors upward as panics: render
/// calls return `Result` and the driver discards the failing voice's block.
/// Read-side accessors (voice readers, graph buffers) do not fail at all;
/// they return zero values or `None` on bad input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A parameter was out of range or an operation was invalid in the
    /// current state (double press, release of an unpressed voice, edge
    /// that would close a cycle, slot already connected).
    InvalidArgument,
    /// A render hook was invoked on a type that does not override it.
    NotImplemented,
    /// Per-voice state was requested but could not be created.
    NoData,
    /// An internal index fell outside its container.
    IndexOutOfBounds,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument or state"),
            Error::NotImplemented => write!(f, "render hook not implemented"),
            Error::NoData => write!(f, "per-voice state unavailable"),
            Error::IndexOutOfBounds => write!(f, "index out of bounds"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
