use thiserror::Error;

/// Errors surfaced at the public boundary of this crate.
///
/// Internal helpers work with `std::io::Result`/`SystemTime` errors and get
/// folded into this enum with `?` and `#[from]`, the way
/// `labs/37-command-runner`'s `CommandError` wraps `std::io::Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// `TaskId::create` failed (the interface list could not be read).
    #[error("task id creation failed")]
    IdCreationFailed,

    /// The wall clock could not be read (e.g. system time before the Unix
    /// epoch). Surfaces as `Run` returning `RunStatus::Failure`.
    #[error("failed to read the wall clock: {0}")]
    ClockReadFailed(#[from] std::time::SystemTimeError),
}

pub type Result<T> = std::result::Result<T, Error>;
