use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use taskid::TaskId;

use crate::error::{Error, Result};

/// Outcome of one `TaskBody::execute` invocation.
///
/// Mirrors the original `op_status_t` enum (`COMPLETE` / `RESCHEDULE` /
/// `FAILED`) one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// Success; the task should not run again.
    Complete,
    /// Success; the task should be re-enqueued at `now + interval`.
    Reschedule,
    /// Failure; the scheduler aborts its run loop.
    Failed,
}

/// A unit of scheduled work.
///
/// The original C `task_t` carried two raw function pointers (`action`,
/// `cleanup`) plus two opaque `void *` parameter blobs. Rust has no
/// equivalent of an untyped pointer that is also safe, so this is
/// re-architected as a single polymorphic `TaskBody` trait object that
/// owns its own state; "cleanup" falls out of `Drop` rather than being a
/// second callback the caller must remember to invoke.
pub trait TaskBody: Send {
    /// Runs the task's action once.
    fn execute(&mut self) -> OpStatus;

    /// A short label for logging. Defaults to the type name.
    fn label(&self) -> &str {
        "task"
    }
}

/// Adapts a plain closure (plus an optional one-shot cleanup closure) into a
/// [`TaskBody`], for callers who don't want to name a type. This is the
/// "user-supplied" task kind mentioned alongside the built-in Kick/Reboot
/// bodies the supervisor defines.
pub struct FnTaskBody<F, C = fn()>
where
    F: FnMut() -> OpStatus + Send,
    C: FnOnce() + Send,
{
    label: String,
    action: F,
    cleanup: Option<C>,
}

impl<F> FnTaskBody<F, fn()>
where
    F: FnMut() -> OpStatus + Send,
{
    /// Wraps `action` with no cleanup behavior.
    pub fn new(label: impl Into<String>, action: F) -> Self {
        FnTaskBody {
            label: label.into(),
            action,
            cleanup: None,
        }
    }
}

impl<F, C> FnTaskBody<F, C>
where
    F: FnMut() -> OpStatus + Send,
    C: FnOnce() + Send,
{
    /// Wraps `action` with a cleanup closure run exactly once when the body
    /// is dropped.
    pub fn with_cleanup(label: impl Into<String>, action: F, cleanup: C) -> Self {
        FnTaskBody {
            label: label.into(),
            action,
            cleanup: Some(cleanup),
        }
    }
}

impl<F, C> TaskBody for FnTaskBody<F, C>
where
    F: FnMut() -> OpStatus + Send,
    C: FnOnce() + Send,
{
    fn execute(&mut self) -> OpStatus {
        (self.action)()
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl<F, C> Drop for FnTaskBody<F, C>
where
    F: FnMut() -> OpStatus + Send,
    C: FnOnce() + Send,
{
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// A scheduled task: identity, body, interval, and next-fire time.
///
/// Ownership: a `Task` exclusively owns its `body`; dropping a `Task` runs
/// whatever `Drop` impl the body carries exactly once, which is the
/// `Task.Destroy`/cleanup-once invariant in the original design. A `Task`
/// is owned by exactly one of {the scheduler's queue, the scheduler's
/// `current` slot} at any instant, never both.
pub struct Task {
    id: TaskId,
    body: Box<dyn TaskBody>,
    interval_seconds: u64,
    execution_time: u64,
}

impl Task {
    /// Allocates a task, assigns a fresh id, and sets
    /// `next_fire = now + interval_seconds`.
    ///
    /// Fails only if id creation fails (host-interface lookup came back
    /// empty) or the wall clock can't be read.
    pub fn create(body: Box<dyn TaskBody>, interval_seconds: u64) -> Result<Task> {
        let id = TaskId::create();
        if id.is_null() {
            return Err(Error::IdCreationFailed);
        }

        let execution_time = now_secs()? + interval_seconds;
        trace!(
            "created task {:?} (\"{}\", interval={}s, fires at {})",
            id,
            body.label(),
            interval_seconds,
            execution_time
        );

        Ok(Task {
            id,
            body,
            interval_seconds,
            execution_time,
        })
    }

    /// Runs the task's action, returning its status unchanged.
    pub fn execute(&mut self) -> OpStatus {
        self.body.execute()
    }

    /// `true` iff this task's id equals `id`.
    pub fn is_same(&self, id: &TaskId) -> bool {
        &self.id == id
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn execution_time(&self) -> u64 {
        self.execution_time
    }

    pub fn label(&self) -> &str {
        self.body.label()
    }

    /// Sets `next_fire = now + interval_seconds`. Fails only if the wall
    /// clock can't be read.
    pub fn update_execution_time(&mut self) -> Result<()> {
        self.execution_time = now_secs()? + self.interval_seconds;
        Ok(())
    }
}

/// Reads the wall clock as whole seconds since the Unix epoch.
///
/// The original `time(&curr_time)` call can fail; `SystemTime::now()`
/// itself cannot, but `duration_since(UNIX_EPOCH)` can (a system clock set
/// before 1970), which is the Rust-idiomatic analog of that failure mode
/// and is what lets the scheduler's wall-clock-read-error path exist at
/// all rather than being dead code.
pub fn now_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_once() -> impl FnMut() -> OpStatus {
        let mut ran = false;
        move || {
            assert!(!ran);
            ran = true;
            OpStatus::Complete
        }
    }

    #[test]
    fn create_sets_execution_time_to_now_plus_interval() {
        let before = now_secs().unwrap();
        let task = Task::create(Box::new(FnTaskBody::new("t", complete_once())), 5).unwrap();
        assert!(task.execution_time() >= before + 5);
        assert!(task.execution_time() <= before + 6);
    }

    #[test]
    fn execute_returns_action_status() {
        let mut task = Task::create(Box::new(FnTaskBody::new("t", complete_once())), 0).unwrap();
        assert_eq!(task.execute(), OpStatus::Complete);
    }

    #[test]
    fn update_execution_time_uses_now_plus_interval() {
        let mut task =
            Task::create(Box::new(FnTaskBody::new("t", || OpStatus::Reschedule)), 3).unwrap();
        let before = now_secs().unwrap();
        task.update_execution_time().unwrap();
        assert!(task.execution_time() >= before + 3);
    }

    #[test]
    fn is_same_matches_only_its_own_id() {
        let task = Task::create(Box::new(FnTaskBody::new("t", complete_once())), 0).unwrap();
        let other = Task::create(Box::new(FnTaskBody::new("t2", complete_once())), 0).unwrap();
        assert!(task.is_same(&task.id()));
        assert!(!task.is_same(&other.id()));
    }

    #[test]
    fn cleanup_runs_exactly_once_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let body = FnTaskBody::with_cleanup(
            "cleanup-test",
            || OpStatus::Complete,
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        let task = Task::create(Box::new(body), 0).unwrap();
        drop(task);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
