//! A minimal application that guards itself with the watchdog protocol,
//! kept the way a lab's thin `main.rs` next to its `lib.rs` demonstrates
//! the public API of the crate behind it.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::info;
use supervisor::Supervisor;

/// How long this demo pretends to do useful work before shutting down.
const WORK_SECONDS: u64 = 60;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let grace_seconds = argv
        .get(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10);

    let supervisor = Supervisor::start(argv, grace_seconds).context("failed to start supervisor")?;

    info!("guarded-worker running for {WORK_SECONDS}s under watchdog supervision");
    for elapsed in 0..WORK_SECONDS {
        thread::sleep(Duration::from_secs(1));
        if elapsed % 10 == 0 {
            info!("still working ({elapsed}s elapsed)");
        }
    }

    supervisor.stop().context("failed to stop supervisor cleanly")?;
    Ok(())
}
