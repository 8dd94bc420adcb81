use std::{any::TypeId, cell::UnsafeCell, ptr::NonNull};

use crate::{
    deleter::ErasedDeleter,
    policy::{Counts, Flag, GroupLock, Policy, Slot},
    stats,
};

/// Shared state of one handle group.
///
/// Heap-allocated and type-erased; every handle in the group points here.
/// The cell is freed exactly when the last edge of any kind leaves, and the
/// referent is destroyed exactly when the strong count reaches zero, even
/// while weak edges keep the cell itself alive for inspection.
///
/// The `type_id` and `deleter` fields are only written under the exclusive
/// side of the group lock; `type_id` reads go through the metadata protocol
/// of the lock. Under `Counted` neither is enforced, matching that policy's
/// external-serialization contract.
pub(crate) struct GroupCell<P: Policy>
{
    referent: P::Slot,
    alive: P::Flag,
    counts: P::Counts,
    lock: P::Lock,
    type_id: UnsafeCell<TypeId>,
    deleter: UnsafeCell<ErasedDeleter>,
}

impl<P: Policy> GroupCell<P>
{
    /// New group of size one, founded by a strong edge.
    pub(crate) fn allocate(ptr: *mut (), type_id: TypeId, deleter: ErasedDeleter)
        -> NonNull<Self>
    {
        let cell = GroupCell {
            referent: P::Slot::new(ptr),
            alive: P::Flag::new(!ptr.is_null()),
            counts: P::Counts::new(),
            lock: P::Lock::new(),
            type_id: UnsafeCell::new(type_id),
            deleter: UnsafeCell::new(deleter),
        };
        stats::group_created(P::SHARED);
        unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(cell))) }
    }

    pub(crate) fn counts(&self) -> &P::Counts { &self.counts }

    pub(crate) fn lock(&self) -> &P::Lock { &self.lock }

    /// Last-known referent address; stays readable after the referent dies
    /// so identity comparison and hashing keep working.
    pub(crate) fn referent_ptr(&self) -> *mut () { self.referent.get() }

    pub(crate) fn is_alive(&self) -> bool { self.alive.get() && !self.referent.get().is_null() }

    /// Concrete type of the current referent, or `None` while the metadata
    /// cannot be read (a writer holds the group under `Local`).
    pub(crate) fn try_referent_type(&self) -> Option<TypeId>
    {
        if !self.lock.lock_metadata() {
            return None;
        }
        let id = unsafe { *self.type_id.get() };
        self.lock.unlock_metadata();
        Some(id)
    }

    /// Group-wide delete. Idempotent: a second call finds the flag down and
    /// does nothing.
    pub(crate) fn delete_referent(&self)
    {
        self.lock.lock_exclusive();
        unsafe {
            self.delete_referent_unlocked();
            self.lock.unlock_exclusive();
        }
    }

    /// Caller holds the exclusive side.
    unsafe fn delete_referent_unlocked(&self)
    {
        if self.alive.get() {
            self.alive.set(false);
            let ptr = self.referent.get();
            if !ptr.is_null() {
                (*self.deleter.get()).invoke(ptr);
            }
        }
    }

    /// Group-wide un-assign: drops the alive flag and hands the raw pointer
    /// back without running the deleter. The slot keeps the address for
    /// identity purposes.
    pub(crate) fn release_referent(&self) -> *mut ()
    {
        self.lock.lock_exclusive();
        let ptr = if self.alive.get() {
            self.alive.set(false);
            self.referent.get()
        } else {
            std::ptr::null_mut()
        };
        unsafe { self.lock.unlock_exclusive() }
        ptr
    }

    /// Group-wide rebind: destroys the old referent, installs the new one,
    /// and raises the alive flag again for every handle in the group.
    pub(crate) fn assign(&self, ptr: *mut (), type_id: TypeId, deleter: ErasedDeleter)
    {
        self.lock.lock_exclusive();
        unsafe {
            self.delete_referent_unlocked();
            *self.type_id.get() = type_id;
            *self.deleter.get() = deleter;
        }
        self.referent.set(ptr);
        self.alive.set(!ptr.is_null());
        unsafe { self.lock.unlock_exclusive() }
    }

    /// A strong edge leaves the group. The last strong edge destroys the
    /// referent and then drops the hidden weak edge held collectively by
    /// the strong side, which may free the cell.
    pub(crate) unsafe fn leave_strong(this: NonNull<Self>)
    {
        if this.as_ref().counts.dec_strong() == 0 {
            this.as_ref().delete_referent();
            Self::leave_weak(this);
        }
    }

    /// A weak edge leaves the group; frees the cell when it was the last
    /// edge of any kind.
    pub(crate) unsafe fn leave_weak(this: NonNull<Self>)
    {
        if this.as_ref().counts.dec_weak() {
            stats::group_freed(P::SHARED);
            drop(Box::from_raw(this.as_ptr()));
        }
    }
}
