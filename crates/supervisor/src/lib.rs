//! The liveness-supervisor protocol: two peers -- an application and a
//! watchdog -- exchanging periodic signals and racing a respawn against
//! silence, built on top of the `scheduler` crate.

mod error;
mod ids;
mod semaphore;
mod signals;
mod supervisor;

pub use error::{Error, Result};
pub use supervisor::{run_watchdog, Supervisor};
