//! Live-object diagnostics, for diagnosing group leaks and the like.
//!
//! Groups under the single-threaded policies are tallied per thread; groups
//! under the thread-safe policies land in one process-global registry, since
//! the thread that frees such a group is rarely the one that created it.
//! Rosters and guards are inherently thread-bound and always tally locally.
//!
//! With the `stats` feature off every hook compiles to nothing.

/// Snapshot of one registry.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Stats
{
    /// Groups currently allocated.
    pub live_groups: usize,

    /// High-water mark of `live_groups`.
    pub peak_groups: usize,

    /// Linked-group rosters currently allocated.
    pub live_rosters: usize,

    /// Read/write guards currently live.
    pub guards: usize,
}

#[allow(dead_code)]
impl Stats
{
    fn group_created(&mut self)
    {
        self.live_groups += 1;
        self.peak_groups = self.peak_groups.max(self.live_groups);
    }

    fn group_freed(&mut self) { self.live_groups = self.live_groups.saturating_sub(1) }
}

#[cfg(feature = "stats")]
mod registry
{
    use std::cell::Cell;

    use lazy_static::lazy_static;
    use parking_lot::Mutex;

    use super::Stats;

    thread_local! {
        static LOCAL: Cell<Stats> = const {
            Cell::new(Stats {
                live_groups: 0,
                peak_groups: 0,
                live_rosters: 0,
                guards: 0,
            })
        };
    }

    lazy_static! {
        static ref GLOBAL: Mutex<Stats> = Mutex::new(Stats::default());
    }

    fn update_local(f: impl FnOnce(&mut Stats))
    {
        LOCAL.with(|s| {
            let mut v = s.get();
            f(&mut v);
            s.set(v);
        })
    }

    /// Registry of the calling thread: its groups, rosters and guards.
    pub fn thread_stats() -> Stats { LOCAL.with(|s| s.get()) }

    /// Process-global registry of thread-safe groups.
    pub fn shared_stats() -> Stats { *GLOBAL.lock() }

    pub(crate) fn group_created(shared: bool)
    {
        if shared {
            GLOBAL.lock().group_created()
        } else {
            update_local(Stats::group_created)
        }
    }

    pub(crate) fn group_freed(shared: bool)
    {
        if shared {
            GLOBAL.lock().group_freed()
        } else {
            update_local(Stats::group_freed)
        }
    }

    pub(crate) fn roster_created() { update_local(|s| s.live_rosters += 1) }

    pub(crate) fn roster_freed()
    {
        update_local(|s| s.live_rosters = s.live_rosters.saturating_sub(1))
    }

    pub(crate) fn guard_taken() { update_local(|s| s.guards += 1) }

    pub(crate) fn guard_released() { update_local(|s| s.guards = s.guards.saturating_sub(1)) }
}

#[cfg(not(feature = "stats"))]
mod registry
{
    use super::Stats;

    pub fn thread_stats() -> Stats { Stats::default() }

    pub fn shared_stats() -> Stats { Stats::default() }

    pub(crate) fn group_created(_shared: bool) {}
    pub(crate) fn group_freed(_shared: bool) {}
    pub(crate) fn roster_created() {}
    pub(crate) fn roster_freed() {}
    pub(crate) fn guard_taken() {}
    pub(crate) fn guard_released() {}
}

#[allow(unused_imports)]
pub(crate) use registry::{
    group_created, group_freed, guard_released, guard_taken, roster_created, roster_freed,
};

pub use registry::{shared_stats, thread_stats};
