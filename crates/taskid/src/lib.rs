//! Process-local unique identifiers for scheduled tasks.
//!
//! A `TaskId` is not a security token: it exists to give the scheduler's
//! priority queue a stable tie-break identity and to give callers a handle
//! they can later hand back to `RemoveTask`. See `UID` in the original
//! watchdog sources this crate generalizes.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length, in bytes, of the padded host-interface tag embedded in a `TaskId`.
///
/// Matches `IP_SA_DATA_LENGTH` from the original `uid.h` -- four bytes of
/// IPv4 address followed by ten bytes of zero padding.
pub const HOST_TAG_LEN: usize = 14;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-local-unique, monotonically ordered task identifier.
///
/// Equality is field-wise. [`TaskId::NULL`] represents "no id / creation
/// failed" and is never produced by a successful [`TaskId::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    counter: u64,
    pid: u32,
    created_at_secs: u64,
    host_tag: [u8; HOST_TAG_LEN],
}

impl TaskId {
    /// The designated "no ID" value.
    pub const NULL: TaskId = TaskId {
        counter: 0,
        pid: 0,
        created_at_secs: 0,
        host_tag: [0u8; HOST_TAG_LEN],
    };

    /// Produces a fresh, process-local-unique id.
    ///
    /// The process-local counter is incremented with an atomic
    /// fetch-and-add, so concurrent creators from different threads never
    /// collide. Returns [`TaskId::NULL`] only if the interface-list lookup
    /// itself fails (`getifaddrs`'s own error path); a host with no
    /// non-loopback interface still produces a valid id with a
    /// zero-filled host tag, matching the original source's `SetIP`, which
    /// only reports failure when `getifaddrs` itself errors.
    pub fn create() -> TaskId {
        let Some(host_tag) = host_tag() else {
            return TaskId::NULL;
        };

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        TaskId {
            counter,
            pid,
            created_at_secs,
            host_tag,
        }
    }

    /// `true` iff this id is [`TaskId::NULL`].
    pub fn is_null(&self) -> bool {
        *self == TaskId::NULL
    }

    /// The whole-second creation timestamp baked into this id.
    pub fn created_at_secs(&self) -> u64 {
        self.created_at_secs
    }
}

/// Field-wise equality of two ids. Exposed as a free function to mirror the
/// original `UIDIsSame(a, b)` call shape used throughout the scheduler.
pub fn equal(a: &TaskId, b: &TaskId) -> bool {
    a == b
}

/// First non-loopback IPv4 interface address, packed into a
/// [`HOST_TAG_LEN`]-byte buffer (4 address bytes + 10 bytes of zero
/// padding). `None` only if the interface list itself could not be read;
/// a readable list with no matching interface yields a zero-filled tag.
fn host_tag() -> Option<[u8; HOST_TAG_LEN]> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    let mut tag = [0u8; HOST_TAG_LEN];

    for ifaddr in addrs {
        if ifaddr.interface_name == "lo" {
            continue;
        }
        let Some(address) = ifaddr.address else {
            continue;
        };
        if let Some(sin) = address.as_sockaddr_in() {
            let ip: Ipv4Addr = sin.ip();
            tag[..4].copy_from_slice(&ip.octets());
            break;
        }
    }

    Some(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_creates_are_pairwise_distinct() {
        let ids: Vec<TaskId> = (0..64).map(|_| TaskId::create()).collect();
        for (i, a) in ids.iter().enumerate() {
            assert!(!a.is_null(), "getifaddrs should succeed even in a minimal sandbox");
            for b in &ids[i + 1..] {
                assert!(!equal(a, b));
            }
        }
    }

    #[test]
    fn counter_is_monotonic_within_a_process() {
        let a = TaskId::create();
        let b = TaskId::create();
        assert!(b.counter > a.counter);
    }

    #[test]
    fn null_is_not_produced_by_create() {
        let id = TaskId::create();
        assert!(!id.is_null());
    }

    #[test]
    fn equal_is_field_wise() {
        let a = TaskId::create();
        assert!(equal(&a, &a));
        assert!(!equal(&a, &TaskId::NULL));
    }
}
