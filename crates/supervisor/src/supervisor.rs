use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::unistd::{getppid, ForkResult, Pid};

use scheduler::{FnTaskBody, OpStatus, Scheduler, StopHandle};

use crate::error::{Error, Result};
use crate::ids::semaphore_names;
use crate::semaphore::NamedSemaphore;
use crate::signals;

/// Number of times `Stop` re-sends the stop signal before giving up and
/// tearing down regardless. `CLOSE_ATTEMPTS_AMOUNT` in the original source.
const STOP_RETRY_ATTEMPTS: u32 = 5;

/// Derived protocol parameters bundled so they aren't scattered across call
/// sites, the way `labs/37-command-runner`'s `CommandBuilder` centralizes
/// its options.
#[derive(Debug, Clone, Copy)]
struct Config {
    grace_seconds: u64,
    kick_interval: u64,
}

impl Config {
    fn new(grace_seconds: u64) -> Result<Config> {
        if grace_seconds < 5 {
            return Err(Error::GraceTooSmall {
                min: 5,
                got: grace_seconds,
            });
        }
        Ok(Config {
            grace_seconds,
            kick_interval: grace_seconds / 5,
        })
    }
}

/// Shared state a `Reboot` dispatch (or the application's one-off initial
/// spawn) needs: who the peer is, the handshake semaphores, the peer's
/// exec line, and a way to stop the local scheduler.
#[derive(Clone)]
struct RebootCtx {
    peer_pid: Arc<AtomicI32>,
    sem_thread: Arc<NamedSemaphore>,
    sem_process: Arc<NamedSemaphore>,
    /// The *peer's* argv -- what gets exec'd if this side has to respawn it.
    peer_argv: Vec<String>,
    stop_handle: StopHandle,
    role: &'static str,
}

/// A running application-side supervisor: owns the supervisor thread and
/// the names (not handles) needed to unlink the semaphore pair at `Stop`.
pub struct Supervisor {
    thread: Option<JoinHandle<()>>,
    scheduler_stop: StopHandle,
    peer_pid: Arc<AtomicI32>,
    sem_thread_name: String,
    sem_process_name: String,
    config: Config,
}

impl Supervisor {
    /// Application-side `Start(argc, argv, grace_seconds)`.
    ///
    /// `argv` is this process's own argv (`argv[0]` is this application's
    /// executable path). Rewrites a watchdog-launch argv from it, spawns the
    /// supervisor thread, and blocks until that thread has completed its
    /// one-off initial watchdog spawn and handshake -- mirroring the
    /// original's `WDSyncApp`, reimplemented as a one-shot channel rendezvous
    /// rather than a second pass over the same named semaphores (see
    /// DESIGN.md).
    pub fn start(argv: Vec<String>, grace_seconds: u64) -> Result<Supervisor> {
        if argv.is_empty() {
            return Err(Error::EmptyArgv);
        }
        let config = Config::new(grace_seconds)?;

        let app_path = PathBuf::from(&argv[0]);
        let watchdog_path = locate_watchdog_binary()?;
        let peer_argv = rewrite_argv_for_watchdog(&argv, &watchdog_path, config.grace_seconds);

        let (sem_thread, sem_process, sem_thread_name, sem_process_name) =
            open_semaphore_pair(&app_path)?;

        signals::install()?;

        let peer_pid = Arc::new(AtomicI32::new(getppid().as_raw()));

        let mut scheduler = Scheduler::new();
        let scheduler_stop = scheduler.stop_handle();

        let reboot_ctx = RebootCtx {
            peer_pid: Arc::clone(&peer_pid),
            sem_thread: Arc::clone(&sem_thread),
            sem_process: Arc::clone(&sem_process),
            peer_argv,
            stop_handle: scheduler.stop_handle(),
            role: "application",
        };

        install_kick_and_reboot(&mut scheduler, &reboot_ctx, config)?;

        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let thread_ctx = reboot_ctx;
        let kick_interval = config.kick_interval;

        let thread = thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs(kick_interval * 2));
                // The application unconditionally spawns its own watchdog
                // on every Start -- fresh boot or post-respawn -- exactly
                // as the original's `WDThread` does via a direct,
                // off-schedule `TaskReboot(NULL)` call before entering the
                // run loop.
                reboot_once(&thread_ctx);
                let _ = ready_tx.send(());

                let status = scheduler.run();
                info!("application supervisor thread exiting with {status:?}");
            })
            .expect("spawning the supervisor thread should not fail under normal resource limits");

        ready_rx
            .recv()
            .map_err(|_| Error::SupervisorThreadPanicked)?;

        Ok(Supervisor {
            thread: Some(thread),
            scheduler_stop,
            peer_pid,
            sem_thread_name,
            sem_process_name,
            config,
        })
    }

    /// Application-side `Stop()`. Consumes the handle: calling it twice is
    /// a compile error rather than a runtime one, which is a stronger
    /// guarantee than spec.md's "idempotent" framing asks for but never
    /// violates it.
    pub fn stop(mut self) -> Result<()> {
        self.scheduler_stop.stop();

        let mut attempts = 0;
        while !signals::stop_received() && attempts < STOP_RETRY_ATTEMPTS {
            let peer = Pid::from_raw(self.peer_pid.load(Ordering::SeqCst));
            if let Err(err) = signals::send_stop(peer) {
                warn!("failed to send stop signal to {peer}: {err}");
            }
            thread::sleep(Duration::from_secs(self.config.grace_seconds));
            attempts += 1;
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("supervisor thread panicked during shutdown");
            }
        }

        // Grace pause before final teardown, matching `WDGraceExit`'s
        // `WDWaitSeconds(downtime)`. The scheduler and both semaphore
        // handles held by the supervisor thread were already dropped when
        // `join` returned above; this sleep only delays the unlink.
        thread::sleep(Duration::from_secs(self.config.grace_seconds));

        NamedSemaphore::unlink(&self.sem_process_name)?;
        NamedSemaphore::unlink(&self.sem_thread_name)?;

        Ok(())
    }
}

/// Watchdog-binary entry point: `is_wd == true`. `forwarded_argv` is this
/// process's own argv as received -- `forwarded_argv[0]` is the watchdog's
/// own path, `forwarded_argv[1]` the grace-seconds string, the remainder
/// the application's original argv. Blocks on the scheduler's run loop and
/// returns once it has observed a stop request and sent the final
/// stop-signal back to the application.
pub fn run_watchdog(forwarded_argv: Vec<String>) -> Result<()> {
    let (grace_seconds, app_argv) = strip_watchdog_prefix(&forwarded_argv)?;
    let config = Config::new(grace_seconds)?;

    if app_argv.is_empty() {
        return Err(Error::EmptyArgv);
    }
    let app_path = Path::new(&app_argv[0]);

    let (sem_thread, sem_process, _sem_thread_name, _sem_process_name) =
        open_semaphore_pair(app_path)?;

    signals::install()?;

    let peer_pid = Arc::new(AtomicI32::new(getppid().as_raw()));

    let mut scheduler = Scheduler::new();
    let reboot_ctx = RebootCtx {
        peer_pid: Arc::clone(&peer_pid),
        sem_thread: Arc::clone(&sem_thread),
        sem_process: Arc::clone(&sem_process),
        peer_argv: app_argv,
        stop_handle: scheduler.stop_handle(),
        role: "watchdog",
    };

    install_kick_and_reboot(&mut scheduler, &reboot_ctx, config)?;

    handshake_respond(&sem_thread, &sem_process)?;

    let status = scheduler.run();
    debug!("watchdog scheduler run() returned {status:?}");

    // Signal the application back regardless of why `run` returned,
    // matching the original's unconditional `kill(observed_pid, SIGUSR2)`
    // right after `SchedulerRun` -- this is what unblocks the
    // application's own `Stop()`, which is waiting on this exact signal.
    let app_pid = Pid::from_raw(peer_pid.load(Ordering::SeqCst));
    if let Err(err) = signals::send_stop(app_pid) {
        warn!("failed to signal application {app_pid} at exit: {err}");
    }

    thread::sleep(Duration::from_secs(config.grace_seconds));

    Ok(())
}

fn install_kick_and_reboot(
    scheduler: &mut Scheduler,
    reboot_ctx: &RebootCtx,
    config: Config,
) -> Result<()> {
    let kick_pid = Arc::clone(&reboot_ctx.peer_pid);
    let kick_body = FnTaskBody::new("kick", move || {
        let peer = Pid::from_raw(kick_pid.load(Ordering::SeqCst));
        if let Err(err) = signals::send_kick(peer) {
            warn!("failed to send kick to {peer}: {err}");
        }
        OpStatus::Reschedule
    });
    scheduler.add_task(Box::new(kick_body), config.kick_interval)?;

    let reboot_ctx = reboot_ctx.clone();
    let reboot_body = FnTaskBody::new("reboot", move || reboot_once(&reboot_ctx));
    scheduler.add_task(Box::new(reboot_body), config.grace_seconds)?;

    Ok(())
}

/// Evaluates one `Reboot` dispatch: stop, respawn, or just clear the kick
/// flag. Also used, outside the scheduler's own queue-driven dispatch, as
/// the application's one-off initial watchdog spawn (see `Supervisor::start`).
fn reboot_once(ctx: &RebootCtx) -> OpStatus {
    if signals::stop_received() {
        debug!("{}: stop received, stopping local scheduler", ctx.role);
        ctx.stop_handle.stop();
        return OpStatus::Complete;
    }

    if signals::kick_received() {
        signals::clear_kick_received();
    } else {
        warn!("{}: no kick observed this window, respawning peer", ctx.role);
        if let Err(err) = respawn(ctx) {
            error!("{}: respawn failed: {err}", ctx.role);
            std::process::exit(1);
        }
    }

    OpStatus::Reschedule
}

/// Forks, execs the peer's stored argv in the child, and performs the
/// initiator side of the handshake in the parent.
fn respawn(ctx: &RebootCtx) -> Result<()> {
    let argv = to_cstrings(&ctx.peer_argv)?;

    // SAFETY: the child does nothing but call `execvp` before any other
    // Rust code runs, which is the one operation POSIX guarantees is safe
    // to perform immediately after `fork` in a multithreaded process.
    match unsafe { nix::unistd::fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            // Only reached if exec failed; exits the child, not the parent.
            let err = Error::Exec(nix::unistd::execvp(&argv[0], &argv).unwrap_err());
            error!("{}: {err}", ctx.role);
            std::process::exit(1);
        }
        ForkResult::Parent { child } => {
            info!("{}: respawned peer as pid {child}", ctx.role);
            ctx.peer_pid.store(child.as_raw(), Ordering::SeqCst);
            handshake_initiate(&ctx.sem_thread, &ctx.sem_process)
        }
    }
}

fn to_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|s| {
            CString::new(s.as_str())
                .map_err(|e| Error::MalformedForwardedArgv(format!("nul byte in argv: {e}")))
        })
        .collect()
}

/// `post(A); wait(B); post(B)` -- the side that initiates a handshake
/// (either peer's `Reboot`, on respawn).
fn handshake_initiate(sem_thread: &NamedSemaphore, sem_process: &NamedSemaphore) -> Result<()> {
    sem_thread.post()?;
    sem_process.wait()?;
    sem_process.post()?;
    Ok(())
}

/// `post(B); wait(A); post(A)` -- the watchdog's startup response to a
/// handshake initiated by the peer that forked it.
fn handshake_respond(sem_thread: &NamedSemaphore, sem_process: &NamedSemaphore) -> Result<()> {
    sem_process.post()?;
    sem_thread.wait()?;
    sem_thread.post()?;
    Ok(())
}

fn open_semaphore_pair(
    app_path: &Path,
) -> Result<(Arc<NamedSemaphore>, Arc<NamedSemaphore>, String, String)> {
    let (thread_name, process_name) = semaphore_names(app_path)?;
    let sem_thread = Arc::new(NamedSemaphore::open_or_create(&thread_name)?);
    let sem_process = Arc::new(NamedSemaphore::open_or_create(&process_name)?);
    Ok((sem_thread, sem_process, thread_name, process_name))
}

/// Prepends the watchdog path and grace-seconds string to `app_argv`,
/// producing the argv the watchdog binary will exec the application with
/// on the *next* respawn.
fn rewrite_argv_for_watchdog(
    app_argv: &[String],
    watchdog_path: &Path,
    grace_seconds: u64,
) -> Vec<String> {
    let mut out = Vec::with_capacity(app_argv.len() + 2);
    out.push(watchdog_path.to_string_lossy().into_owned());
    out.push(grace_seconds.to_string());
    out.extend(app_argv.iter().cloned());
    out
}

/// Inverse of [`rewrite_argv_for_watchdog`]: splits a forwarded argv into
/// `(grace_seconds, app_argv)`.
fn strip_watchdog_prefix(forwarded_argv: &[String]) -> Result<(u64, Vec<String>)> {
    if forwarded_argv.len() < 2 {
        return Err(Error::MalformedForwardedArgv(format!(
            "expected at least [watchdog_path, grace_seconds, ...app_argv], got {} elements",
            forwarded_argv.len()
        )));
    }
    let grace_seconds: u64 = forwarded_argv[1].parse().map_err(|_| {
        Error::MalformedForwardedArgv(format!(
            "grace-seconds argument {:?} is not a valid integer",
            forwarded_argv[1]
        ))
    })?;
    Ok((grace_seconds, forwarded_argv[2..].to_vec()))
}

/// Locates the watchdog binary per spec.md's binary layout: `./watchdog.out`
/// in release, `../watchdog_dbg.out` in debug, falling back to the other
/// candidate if the expected one is missing.
fn locate_watchdog_binary() -> Result<PathBuf> {
    let (first, second) = if cfg!(debug_assertions) {
        (Path::new("../watchdog_dbg.out"), Path::new("./watchdog.out"))
    } else {
        (Path::new("./watchdog.out"), Path::new("../watchdog_dbg.out"))
    };

    for candidate in [first, second] {
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
    }

    Err(Error::WatchdogBinaryNotFound {
        checked: vec![first.display().to_string(), second.display().to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_grace_seconds_below_five() {
        assert!(Config::new(4).is_err());
        assert!(Config::new(5).is_ok());
    }

    #[test]
    fn kick_interval_is_one_fifth_of_grace_seconds() {
        let config = Config::new(25).unwrap();
        assert_eq!(config.kick_interval, 5);
    }

    #[test]
    fn rewrite_then_strip_round_trips_the_application_argv() {
        let app_argv = vec!["./my-app".to_string(), "--flag".to_string()];
        let watchdog_path = Path::new("./watchdog.out");
        let rewritten = rewrite_argv_for_watchdog(&app_argv, watchdog_path, 10);
        assert_eq!(
            rewritten,
            vec!["./watchdog.out", "10", "./my-app", "--flag"]
        );

        let (grace_seconds, recovered) = strip_watchdog_prefix(&rewritten).unwrap();
        assert_eq!(grace_seconds, 10);
        assert_eq!(recovered, app_argv);
    }

    #[test]
    fn strip_rejects_a_too_short_forwarded_argv() {
        let forwarded = vec!["./watchdog.out".to_string()];
        assert!(strip_watchdog_prefix(&forwarded).is_err());
    }

    #[test]
    fn strip_rejects_a_non_numeric_grace_seconds_field() {
        let forwarded = vec![
            "./watchdog.out".to_string(),
            "not-a-number".to_string(),
            "./my-app".to_string(),
        ];
        assert!(strip_watchdog_prefix(&forwarded).is_err());
    }

    #[test]
    fn locate_watchdog_binary_fails_cleanly_when_neither_candidate_exists() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = locate_watchdog_binary();
        std::env::set_current_dir(original).unwrap();
        assert!(result.is_err());
    }
}
