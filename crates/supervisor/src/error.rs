use thiserror::Error;

/// Errors surfaced at the public boundary of this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("grace_seconds must be >= {min}, got {got}")]
    GraceTooSmall { min: u64, got: u64 },

    #[error("argv must contain at least the program path")]
    EmptyArgv,

    #[error("scheduler error: {0}")]
    Scheduler(#[from] scheduler::Error),

    #[error("failed to install signal handlers: {0}")]
    SignalInstall(#[source] std::io::Error),

    #[error("failed to derive an ipc key from {path}: {source}")]
    KeyDerivation {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open named semaphore {name}: {source}")]
    SemaphoreOpen {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("semaphore operation failed: {0}")]
    SemaphoreOp(#[source] std::io::Error),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("exec failed: {0}")]
    Exec(#[source] nix::Error),

    #[error("could not locate the watchdog binary (checked {checked:?})")]
    WatchdogBinaryNotFound { checked: Vec<String> },

    #[error("forwarded argv from the watchdog launcher was malformed: {0}")]
    MalformedForwardedArgv(String),

    #[error("supervisor thread panicked")]
    SupervisorThreadPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
