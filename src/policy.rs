use std::{
    cell::Cell,
    sync::atomic::{
        AtomicPtr, AtomicU64,
        Ordering::{AcqRel, Acquire, Release},
    },
};

#[cfg(feature = "shared")]
use lock_api::RawRwLock as _;

mod sealed
{
    pub trait Sealed {}
}

/// Concurrency policy of a handle group.
///
/// The group protocol is written once against this trait; the policy decides
/// how the reference counts, the referent slot, the alive flag and the group
/// lock are stored. See `Local`, `Counted` and `Shared`.
pub trait Policy: sealed::Sealed + 'static
{
    type Counts: Counts;
    type Slot: Slot;
    type Flag: Flag;
    type Lock: GroupLock;

    /// Routes diagnostics to the process-global registry instead of the
    /// thread-local one.
    const SHARED: bool;
}

/// Strong/weak reference bookkeeping of one group.
///
/// Strong handles collectively hold one hidden weak edge, dropped by the
/// strong handle that brings the strong count to zero. The group state is
/// freed by whichever edge observes the counts reaching zero overall, so
/// the decision is a single operation even under the atomic policies.
pub trait Counts
{
    /// Fresh counts for a group created by one strong handle: one strong
    /// edge plus the hidden weak edge.
    fn new() -> Self;

    fn inc_strong(&self);

    /// Increments the strong count only while it is above zero, failing
    /// permanently once the last strong edge has left. The resurrection
    /// paths (`upgrade`, `downcast`) must use this form: a plain increment
    /// can race the departing last owner, revive a count it has already
    /// seen hit zero, and tear the group down twice.
    fn try_inc_strong(&self) -> bool;

    fn inc_weak(&self);

    /// Decrements the strong count, saturating at zero, and returns the new
    /// strong count.
    fn dec_strong(&self) -> usize;

    /// Decrements the weak count, saturating at zero. Returns true when no
    /// edges of any kind remain.
    fn dec_weak(&self) -> bool;

    fn strong(&self) -> usize;

    /// Weak count as observed by callers, excluding the hidden edge.
    fn weak(&self) -> usize;
}

/// Storage for the type-erased referent pointer.
pub trait Slot
{
    fn new(ptr: *mut ()) -> Self;
    fn get(&self) -> *mut ();
    fn set(&self, ptr: *mut ());
}

/// Storage for the alive flag.
pub trait Flag
{
    fn new(v: bool) -> Self;
    fn get(&self) -> bool;
    fn set(&self, v: bool);
}

/// Shared/exclusive access protocol of one group.
///
/// Guards acquire the shared side with the `try_` operations; group mutators
/// (`assign`, `destroy`, `release`, teardown) go through `lock_exclusive`.
/// The metadata pair brackets short reads of the group's bookkeeping (the
/// referent `TypeId`) that must not tear under the `Shared` policy.
pub trait GroupLock
{
    fn new() -> Self;

    /// Fails when contended, or always under a policy that grants no guards.
    fn try_lock_shared(&self) -> bool;

    fn try_lock_exclusive(&self) -> bool;

    /// Acquire for a group mutation. Blocks under `Shared`, panics on a live
    /// guard under `Local`, passes through unguarded under `Counted`.
    fn lock_exclusive(&self);

    /// Returns false when the metadata cannot currently be read.
    fn lock_metadata(&self) -> bool;

    fn unlock_metadata(&self);

    /// Caller must hold the shared side.
    unsafe fn unlock_shared(&self);

    /// Caller must hold the exclusive side.
    unsafe fn unlock_exclusive(&self);
}

/// Single-threaded baseline policy. Plain counters, and a borrow-flag lock
/// that panics when a group mutation races a live guard on the same thread.
pub enum Local {}

impl sealed::Sealed for Local {}
impl Policy for Local
{
    type Counts = LocalCounts;
    type Slot = CellSlot;
    type Flag = CellFlag;
    type Lock = BorrowFlag;

    const SHARED: bool = false;
}

/// Atomic drop-in policy: reference-count bookkeeping is thread-safe, nothing
/// else is. Handles move across threads, but `assign`/`destroy`/dereference
/// must be serialized externally; the policy enforces the weaker contract by
/// refusing to grant read/write guards at all.
pub enum Counted {}

impl sealed::Sealed for Counted {}
impl Policy for Counted
{
    type Counts = AtomicCounts;
    type Slot = AtomicSlot;
    type Flag = AtomicFlag;
    type Lock = Unguarded;

    const SHARED: bool = true;
}

/// Fully synchronized policy: atomic counters plus a raw reader/writer lock.
/// Guards take the shared side, group mutators the exclusive side, and guard
/// acquisition re-checks liveness after locking.
#[cfg(feature = "shared")]
pub enum Shared {}

#[cfg(feature = "shared")]
impl sealed::Sealed for Shared {}
#[cfg(feature = "shared")]
impl Policy for Shared
{
    type Counts = AtomicCounts;
    type Slot = AtomicSlot;
    type Flag = AtomicFlag;
    type Lock = SharedLock;

    const SHARED: bool = true;
}

pub struct LocalCounts
{
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Counts for LocalCounts
{
    fn new() -> Self
    {
        LocalCounts {
            strong: Cell::new(1),
            weak: Cell::new(1),
        }
    }

    fn inc_strong(&self) { self.strong.set(self.strong.get() + 1) }

    fn try_inc_strong(&self) -> bool
    {
        if self.strong.get() == 0 {
            false
        } else {
            self.inc_strong();
            true
        }
    }

    fn inc_weak(&self) { self.weak.set(self.weak.get() + 1) }

    fn dec_strong(&self) -> usize
    {
        let n = self.strong.get().saturating_sub(1);
        self.strong.set(n);
        n
    }

    fn dec_weak(&self) -> bool
    {
        let n = self.weak.get().saturating_sub(1);
        self.weak.set(n);
        n == 0 && self.strong.get() == 0
    }

    fn strong(&self) -> usize { self.strong.get() }

    fn weak(&self) -> usize
    {
        let w = self.weak.get();
        if self.strong.get() > 0 {
            w.saturating_sub(1)
        } else {
            w
        }
    }
}

const WEAK_UNIT: u64 = 1 << 32;
const STRONG_MASK: u64 = WEAK_UNIT - 1;

// Half-word counters wrap into their neighbor on overflow; treat 2^31
// edges in one group as a leak and abort, like `Arc` does.
const HALF_LIMIT: u64 = (u32::MAX / 2) as u64;

/// Both counts packed into one word so that "no edges remain" is decided by
/// a single atomic update.
pub struct AtomicCounts(AtomicU64);

impl Counts for AtomicCounts
{
    fn new() -> Self { AtomicCounts(AtomicU64::new(1 + WEAK_UNIT)) }

    fn inc_strong(&self)
    {
        let old = self.0.fetch_add(1, AcqRel);
        if old & STRONG_MASK >= HALF_LIMIT {
            std::process::abort();
        }
    }

    fn try_inc_strong(&self) -> bool
    {
        self.0
            .fetch_update(AcqRel, Acquire, |v| match v & STRONG_MASK {
                0 => None,
                n if n >= HALF_LIMIT => std::process::abort(),
                _ => Some(v + 1),
            })
            .is_ok()
    }

    fn inc_weak(&self)
    {
        let old = self.0.fetch_add(WEAK_UNIT, AcqRel);
        if old >> 32 >= HALF_LIMIT {
            std::process::abort();
        }
    }

    fn dec_strong(&self) -> usize
    {
        let old = self
            .0
            .fetch_update(AcqRel, Acquire, |v| {
                Some(if v & STRONG_MASK == 0 { v } else { v - 1 })
            })
            .unwrap_or_else(|v| v);
        ((old & STRONG_MASK).saturating_sub(1)) as usize
    }

    fn dec_weak(&self) -> bool
    {
        let old = self
            .0
            .fetch_update(AcqRel, Acquire, |v| {
                Some(if v >> 32 == 0 { v } else { v - WEAK_UNIT })
            })
            .unwrap_or_else(|v| v);
        let new = if old >> 32 == 0 { old } else { old - WEAK_UNIT };
        new == 0
    }

    fn strong(&self) -> usize { (self.0.load(Acquire) & STRONG_MASK) as usize }

    fn weak(&self) -> usize
    {
        let v = self.0.load(Acquire);
        let w = (v >> 32) as usize;
        if v & STRONG_MASK > 0 {
            w.saturating_sub(1)
        } else {
            w
        }
    }
}

#[repr(transparent)]
pub struct CellSlot(Cell<*mut ()>);

impl Slot for CellSlot
{
    fn new(ptr: *mut ()) -> Self { CellSlot(Cell::new(ptr)) }

    fn get(&self) -> *mut () { self.0.get() }

    fn set(&self, ptr: *mut ()) { self.0.set(ptr) }
}

#[repr(transparent)]
pub struct AtomicSlot(AtomicPtr<()>);

impl Slot for AtomicSlot
{
    fn new(ptr: *mut ()) -> Self { AtomicSlot(AtomicPtr::new(ptr)) }

    fn get(&self) -> *mut () { self.0.load(Acquire) }

    fn set(&self, ptr: *mut ()) { self.0.store(ptr, Release) }
}

#[repr(transparent)]
pub struct CellFlag(Cell<bool>);

impl Flag for CellFlag
{
    fn new(v: bool) -> Self { CellFlag(Cell::new(v)) }

    fn get(&self) -> bool { self.0.get() }

    fn set(&self, v: bool) { self.0.set(v) }
}

#[repr(transparent)]
pub struct AtomicFlag(std::sync::atomic::AtomicBool);

impl Flag for AtomicFlag
{
    fn new(v: bool) -> Self { AtomicFlag(std::sync::atomic::AtomicBool::new(v)) }

    fn get(&self) -> bool { self.0.load(Acquire) }

    fn set(&self, v: bool) { self.0.store(v, Release) }
}

/// RefCell-style borrow tracking: zero is free, positive counts readers,
/// minus one marks the writer.
#[repr(transparent)]
pub struct BorrowFlag(Cell<isize>);

impl GroupLock for BorrowFlag
{
    fn new() -> Self { BorrowFlag(Cell::new(0)) }

    fn try_lock_shared(&self) -> bool
    {
        let n = self.0.get();
        if n >= 0 {
            self.0.set(n + 1);
            true
        } else {
            false
        }
    }

    fn try_lock_exclusive(&self) -> bool
    {
        if self.0.get() == 0 {
            self.0.set(-1);
            true
        } else {
            false
        }
    }

    fn lock_exclusive(&self)
    {
        if !self.try_lock_exclusive() {
            panic!("group mutated while a guard into it is live");
        }
    }

    fn lock_metadata(&self) -> bool { self.try_lock_shared() }

    fn unlock_metadata(&self) { unsafe { self.unlock_shared() } }

    unsafe fn unlock_shared(&self)
    {
        debug_assert!(self.0.get() > 0);
        self.0.set(self.0.get() - 1);
    }

    unsafe fn unlock_exclusive(&self)
    {
        debug_assert!(self.0.get() == -1);
        self.0.set(0);
    }
}

/// The `Counted` lock: mutators pass through unguarded, guards are never
/// granted. Serializing referent access is the caller's contract under that
/// policy.
pub struct Unguarded;

impl GroupLock for Unguarded
{
    fn new() -> Self { Unguarded }

    fn try_lock_shared(&self) -> bool { false }

    fn try_lock_exclusive(&self) -> bool { false }

    fn lock_exclusive(&self) {}

    fn lock_metadata(&self) -> bool { true }

    fn unlock_metadata(&self) {}

    unsafe fn unlock_shared(&self) {}

    unsafe fn unlock_exclusive(&self) {}
}

#[cfg(feature = "shared")]
#[repr(transparent)]
pub struct SharedLock(parking_lot::RawRwLock);

#[cfg(feature = "shared")]
impl SharedLock
{
    pub(crate) fn lock_shared_blocking(&self) { self.0.lock_shared() }

    pub(crate) fn lock_exclusive_blocking(&self) { self.0.lock_exclusive() }
}

#[cfg(feature = "shared")]
impl GroupLock for SharedLock
{
    fn new() -> Self { SharedLock(<parking_lot::RawRwLock as lock_api::RawRwLock>::INIT) }

    fn try_lock_shared(&self) -> bool { self.0.try_lock_shared() }

    fn try_lock_exclusive(&self) -> bool { self.0.try_lock_exclusive() }

    fn lock_exclusive(&self) { self.0.lock_exclusive() }

    fn lock_metadata(&self) -> bool
    {
        self.0.lock_shared();
        true
    }

    fn unlock_metadata(&self) { unsafe { self.0.unlock_shared() } }

    unsafe fn unlock_shared(&self) { self.0.unlock_shared() }

    unsafe fn unlock_exclusive(&self) { self.0.unlock_exclusive() }
}
