//! The watchdog binary: `is_wd == true`. Forked and exec'd by an
//! application's supervisor thread, never run directly by a user.

use anyhow::Context;
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let forwarded_argv: Vec<String> = std::env::args().collect();

    supervisor::run_watchdog(forwarded_argv).context("watchdog run failed")?;

    info!("watchdog exiting cleanly");
    Ok(())
}
