use thiserror::Error;

/// Errors surfaced by the color index and its build pipeline.
#[derive(Debug, Error)]
pub enum ColorIndexError {
    /// Unrecoverable I/O while reading sequences or an index file.
    #[error("input read error: {0}")]
    InputRead(#[from] std::io::Error),

    /// Index file carries an unknown magic or version prefix, or does not
    /// match the graph it is loaded against.
    #[error("incompatible index file: {0}")]
    VersionMismatch(String),

    /// Tag byte outside the four known color-set representations.
    #[error("corrupt color set (tag byte {0})")]
    CorruptColorSet(u8),

    /// A unitig routed to the overflow map has no entry there.
    #[error("no color set registered for unitig head {0:#018x}")]
    MissingColorSet(u64),

    /// Join or extract called with inconsistent sizes, offsets or slots.
    #[error("invalid graph edit: {0}")]
    InvalidEdit(String),

    /// Refused an allocation that exceeds any plausible index size.
    #[error("allocation of {0} bytes rejected while reading index")]
    OutOfMemory(u64),

    /// The shared cancellation token was set during a build.
    #[error("build cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ColorIndexError>;
