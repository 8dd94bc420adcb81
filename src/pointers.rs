use std::{
    any::TypeId,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use crate::{
    deleter::{Deleter, ErasedDeleter},
    policy::{Counts, GroupLock, Local, Policy},
    state::GroupCell,
    stats,
};

#[cfg(feature = "shared")]
use crate::policy::Shared;

/// Owning handle into a group.
///
/// Cloning an `Owner` does not copy the referent, it joins the clone to the
/// same group: a later `assign`, `destroy` or `release` through any member
/// is observed by every member. That group-wide visibility is what
/// distinguishes this type from an ordinary reference-counted pointer. The
/// referent is destroyed when the last owning handle leaves; weak observers
/// keep only the group state alive, never the referent.
///
/// Identity (`Eq`, `Ord`, `Hash`) follows the last-known referent address,
/// so a handle whose referent has died still hashes and compares the way it
/// did while alive and remains findable in hash-keyed collections.
pub struct Owner<T: 'static, P: Policy = Local>
{
    cell: Option<NonNull<GroupCell<P>>>,
    _marker: PhantomData<*mut T>,
}

/// Observing handle into a group.
///
/// Tracks liveness of the group's referent without owning it; the referent
/// can die while any number of `Weak` handles remain. `upgrade` is the only
/// way back to ownership and yields `None` once the referent is gone.
pub struct Weak<T: 'static, P: Policy = Local>
{
    cell: Option<NonNull<GroupCell<P>>>,
    _marker: PhantomData<*mut T>,
}

#[allow(dead_code)]
impl<T: 'static, P: Policy> Owner<T, P>
{
    /// New singleton group owning `it`.
    pub fn new(it: Box<T>) -> Self
    {
        unsafe { Self::from_raw(Box::into_raw(it), Deleter::Boxed) }
    }

    /// New singleton group owning `it`, torn down with `deleter` instead of
    /// the default boxed drop.
    pub fn with_deleter(it: Box<T>, deleter: Deleter<T>) -> Self
    {
        unsafe { Self::from_raw(Box::into_raw(it), deleter) }
    }

    /// Handle pointing at nothing. Joins no group until assigned into one.
    pub fn empty() -> Self
    {
        Owner {
            cell: None,
            _marker: PhantomData,
        }
    }

    /// New singleton group over a caller-allocated referent.
    ///
    /// Caller asserts `ptr` stays valid until the deleter runs, and that the
    /// deleter matches the allocation source.
    pub unsafe fn from_raw(ptr: *mut T, deleter: Deleter<T>) -> Self
    {
        let cell = GroupCell::allocate(
            ptr as *mut (),
            TypeId::of::<T>(),
            ErasedDeleter::erase(deleter),
        );
        Owner {
            cell: Some(cell),
            _marker: PhantomData,
        }
    }

    /// Last-known referent address, regardless of liveness.
    pub fn hashkey(&self) -> *mut T
    {
        match self.cell_as_ref() {
            Some(cell) => cell.referent_ptr() as *mut T,
            None => std::ptr::null_mut(),
        }
    }

    /// Current referent, or null once the group's referent has died.
    pub fn get(&self) -> *mut T
    {
        if self.alive() {
            self.hashkey()
        } else {
            std::ptr::null_mut()
        }
    }

    pub fn alive(&self) -> bool { self.cell_as_ref().is_some_and(|c| c.is_alive()) }

    pub fn expired(&self) -> bool { !self.alive() }

    pub fn strong_count(&self) -> usize { self.cell_as_ref().map_or(0, |c| c.counts().strong()) }

    pub fn weak_count(&self) -> usize { self.cell_as_ref().map_or(0, |c| c.counts().weak()) }

    /// Rebinds the whole group to a fresh referent. Every handle in the
    /// group, weak ones included, observes the new object and reports alive
    /// again. An empty handle founds a new singleton group.
    pub fn assign(&mut self, it: Box<T>)
    {
        unsafe { self.assign_raw(Box::into_raw(it), Deleter::Boxed) }
    }

    /// `assign` over a caller-allocated referent; same contract as
    /// [`Owner::from_raw`].
    pub unsafe fn assign_raw(&mut self, ptr: *mut T, deleter: Deleter<T>)
    {
        match self.cell_as_ref() {
            Some(cell) => cell.assign(
                ptr as *mut (),
                TypeId::of::<T>(),
                ErasedDeleter::erase(deleter),
            ),
            None => {
                self.cell = Some(GroupCell::allocate(
                    ptr as *mut (),
                    TypeId::of::<T>(),
                    ErasedDeleter::erase(deleter),
                ));
            }
        }
    }

    /// Destroys the referent for the whole group. Every member transitions
    /// to dead with a null `get`, while identity stays intact. Idempotent.
    pub fn destroy(&self)
    {
        if let Some(cell) = self.cell_as_ref() {
            cell.delete_referent();
        }
    }

    /// Un-assigns the group's referent and returns the raw pointer without
    /// running the deleter; the caller now owns cleanup. Null when the group
    /// was already dead or the handle is empty.
    pub fn release(&self) -> *mut T
    {
        match self.cell_as_ref() {
            Some(cell) => cell.release_referent() as *mut T,
            None => std::ptr::null_mut(),
        }
    }

    /// Detaches this handle only: it leaves the group and becomes empty. The
    /// group lives on for the remaining members.
    pub fn reset(&mut self)
    {
        if let Some(cell) = self.cell.take() {
            unsafe { GroupCell::leave_strong(cell) }
        }
    }

    /// Non-owning observer of the same group.
    pub fn downgrade(&self) -> Weak<T, P>
    {
        if let Some(cell) = self.cell_as_ref() {
            cell.counts().inc_weak();
        }
        Weak {
            cell: self.cell,
            _marker: PhantomData,
        }
    }

    /// Shared borrow of the referent, or `None` when the referent is dead or
    /// the group is exclusively held. Liveness is re-checked after the lock
    /// is taken, so a guard never observes a dying referent. Under `Counted`
    /// this always fails.
    pub fn try_read(&self) -> Option<ReadGuard<'_, T, P>>
    {
        read_cell(self.cell_as_ref()?)
    }

    /// Exclusive borrow of the referent, with the same liveness protocol as
    /// [`Owner::try_read`].
    pub fn try_write(&self) -> Option<WriteGuard<'_, T, P>>
    {
        write_cell(self.cell_as_ref()?)
    }

    /// Handle of another static type over the same group, when the group's
    /// referent really is a `U`. Yields `None` on a type mismatch or a dead
    /// referent, without touching this handle.
    pub fn downcast<U: 'static>(&self) -> Option<Owner<U, P>>
    {
        let cell = self.cell_as_ref()?;
        if !cell.is_alive() || cell.try_referent_type()? != TypeId::of::<U>() {
            return None;
        }
        if !cell.counts().try_inc_strong() {
            return None;
        }
        Some(Owner {
            cell: self.cell,
            _marker: PhantomData,
        })
    }

    /// Reinterprets the group's referent address at type `U` without any
    /// check, sharing the group state. Caller asserts the address is valid
    /// at `U` (for instance a `#[repr(transparent)]` wrapper).
    pub unsafe fn cast<U: 'static>(&self) -> Owner<U, P>
    {
        if let Some(cell) = self.cell_as_ref() {
            cell.counts().inc_strong();
        }
        Owner {
            cell: self.cell,
            _marker: PhantomData,
        }
    }

    fn cell_as_ref(&self) -> Option<&GroupCell<P>>
    {
        self.cell.map(|c| unsafe { &*c.as_ptr() })
    }
}

#[cfg(feature = "shared")]
impl<T: 'static> Owner<T, Shared>
{
    /// Blocking counterpart of [`Owner::try_read`]: waits for the shared
    /// side of the group lock, but still yields `None` instead of blocking
    /// on a referent that is already dead.
    pub fn read(&self) -> Option<ReadGuard<'_, T, Shared>>
    {
        read_cell_blocking(self.cell_as_ref()?)
    }

    /// Blocking counterpart of [`Owner::try_write`].
    pub fn write(&self) -> Option<WriteGuard<'_, T, Shared>>
    {
        write_cell_blocking(self.cell_as_ref()?)
    }
}

#[allow(dead_code)]
impl<T: 'static, P: Policy> Weak<T, P>
{
    pub fn empty() -> Self
    {
        Weak {
            cell: None,
            _marker: PhantomData,
        }
    }

    pub fn hashkey(&self) -> *mut T
    {
        match self.cell_as_ref() {
            Some(cell) => cell.referent_ptr() as *mut T,
            None => std::ptr::null_mut(),
        }
    }

    pub fn get(&self) -> *mut T
    {
        if self.alive() {
            self.hashkey()
        } else {
            std::ptr::null_mut()
        }
    }

    pub fn alive(&self) -> bool { self.cell_as_ref().is_some_and(|c| c.is_alive()) }

    pub fn expired(&self) -> bool { !self.alive() }

    pub fn strong_count(&self) -> usize { self.cell_as_ref().map_or(0, |c| c.counts().strong()) }

    pub fn weak_count(&self) -> usize { self.cell_as_ref().map_or(0, |c| c.counts().weak()) }

    /// The sole bridge back to ownership: a new strong handle in the same
    /// group, or `None` once the referent has died.
    pub fn upgrade(&self) -> Option<Owner<T, P>>
    {
        let cell = self.cell_as_ref()?;
        if !cell.is_alive() || !cell.counts().try_inc_strong() {
            return None;
        }
        let owner = Owner {
            cell: self.cell,
            _marker: PhantomData,
        };
        // The group may have died between the check and the increment; the
        // freshly taken edge then leaves through the normal drop path.
        if owner.alive() {
            Some(owner)
        } else {
            None
        }
    }

    /// Detaches this observer; the group is unaffected beyond the count.
    pub fn reset(&mut self)
    {
        if let Some(cell) = self.cell.take() {
            unsafe { GroupCell::leave_weak(cell) }
        }
    }

    /// Shared borrow of the referent; same protocol as [`Owner::try_read`].
    pub fn try_read(&self) -> Option<ReadGuard<'_, T, P>>
    {
        read_cell(self.cell_as_ref()?)
    }

    /// Observer of another static type over the same group; `None` on a
    /// type mismatch or a dead referent.
    pub fn downcast<U: 'static>(&self) -> Option<Weak<U, P>>
    {
        let cell = self.cell_as_ref()?;
        if !cell.is_alive() || cell.try_referent_type()? != TypeId::of::<U>() {
            return None;
        }
        cell.counts().inc_weak();
        Some(Weak {
            cell: self.cell,
            _marker: PhantomData,
        })
    }

    fn cell_as_ref(&self) -> Option<&GroupCell<P>>
    {
        self.cell.map(|c| unsafe { &*c.as_ptr() })
    }
}

#[cfg(feature = "shared")]
impl<T: 'static> Weak<T, Shared>
{
    /// Blocking counterpart of [`Weak::try_read`].
    pub fn read(&self) -> Option<ReadGuard<'_, T, Shared>>
    {
        read_cell_blocking(self.cell_as_ref()?)
    }
}

impl<T: 'static, P: Policy> Clone for Owner<T, P>
{
    fn clone(&self) -> Self
    {
        if let Some(cell) = self.cell_as_ref() {
            cell.counts().inc_strong();
        }
        Owner {
            cell: self.cell,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static, P: Policy> Clone for Weak<T, P>
{
    fn clone(&self) -> Self
    {
        if let Some(cell) = self.cell_as_ref() {
            cell.counts().inc_weak();
        }
        Weak {
            cell: self.cell,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static, P: Policy> Drop for Owner<T, P>
{
    fn drop(&mut self)
    {
        if let Some(cell) = self.cell.take() {
            unsafe { GroupCell::leave_strong(cell) }
        }
    }
}

impl<T: 'static, P: Policy> Drop for Weak<T, P>
{
    fn drop(&mut self)
    {
        if let Some(cell) = self.cell.take() {
            unsafe { GroupCell::leave_weak(cell) }
        }
    }
}

impl<T: 'static, P: Policy> Default for Owner<T, P>
{
    fn default() -> Self { Self::empty() }
}

impl<T: 'static, P: Policy> Default for Weak<T, P>
{
    fn default() -> Self { Self::empty() }
}

// The Counted policy keeps only the bookkeeping thread-safe; handles move
// between threads, everything touching the referent is the caller's to
// serialize. The deleter may run on whichever thread leaves last, hence
// `T: Send`.
unsafe impl<T: Send + 'static> Send for Owner<T, crate::policy::Counted> {}
unsafe impl<T: Send + 'static> Send for Weak<T, crate::policy::Counted> {}

#[cfg(feature = "shared")]
unsafe impl<T: Send + Sync + 'static> Send for Owner<T, Shared> {}
#[cfg(feature = "shared")]
unsafe impl<T: Send + Sync + 'static> Sync for Owner<T, Shared> {}
#[cfg(feature = "shared")]
unsafe impl<T: Send + Sync + 'static> Send for Weak<T, Shared> {}
#[cfg(feature = "shared")]
unsafe impl<T: Send + Sync + 'static> Sync for Weak<T, Shared> {}

impl<T: 'static, P: Policy> PartialEq for Owner<T, P>
{
    fn eq(&self, other: &Self) -> bool { self.hashkey() == other.hashkey() }
}
impl<T: 'static, P: Policy> Eq for Owner<T, P> {}

impl<T: 'static, P: Policy> PartialEq for Weak<T, P>
{
    fn eq(&self, other: &Self) -> bool { self.hashkey() == other.hashkey() }
}
impl<T: 'static, P: Policy> Eq for Weak<T, P> {}

impl<T: 'static, P: Policy> PartialEq<Weak<T, P>> for Owner<T, P>
{
    fn eq(&self, other: &Weak<T, P>) -> bool { self.hashkey() == other.hashkey() }
}

impl<T: 'static, P: Policy> PartialEq<Owner<T, P>> for Weak<T, P>
{
    fn eq(&self, other: &Owner<T, P>) -> bool { self.hashkey() == other.hashkey() }
}

impl<T: 'static, P: Policy> PartialOrd for Owner<T, P>
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl<T: 'static, P: Policy> Ord for Owner<T, P>
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.hashkey().cmp(&other.hashkey()) }
}

impl<T: 'static, P: Policy> PartialOrd for Weak<T, P>
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl<T: 'static, P: Policy> Ord for Weak<T, P>
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.hashkey().cmp(&other.hashkey()) }
}

impl<T: 'static, P: Policy> Hash for Owner<T, P>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.hashkey().hash(state) }
}

impl<T: 'static, P: Policy> Hash for Weak<T, P>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.hashkey().hash(state) }
}

impl<T: 'static, P: Policy> fmt::Debug for Owner<T, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Owner")
            .field("hashkey", &self.hashkey())
            .field("alive", &self.alive())
            .finish()
    }
}

impl<T: 'static, P: Policy> fmt::Debug for Weak<T, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Weak")
            .field("hashkey", &self.hashkey())
            .field("alive", &self.alive())
            .finish()
    }
}

/// Shared borrow of a group's referent, holding the shared side of the
/// group lock. While any read guard is live, group mutation either blocks
/// (`Shared`) or panics (`Local`).
pub struct ReadGuard<'a, T: 'static, P: Policy>
{
    cell: &'a GroupCell<P>,
    ptr: NonNull<T>,
}

/// Exclusive borrow of a group's referent, holding the exclusive side of
/// the group lock.
pub struct WriteGuard<'a, T: 'static, P: Policy>
{
    cell: &'a GroupCell<P>,
    ptr: NonNull<T>,
}

fn read_cell<T: 'static, P: Policy>(cell: &GroupCell<P>) -> Option<ReadGuard<'_, T, P>>
{
    if !cell.is_alive() || !cell.lock().try_lock_shared() {
        return None;
    }
    finish_read(cell)
}

fn write_cell<T: 'static, P: Policy>(cell: &GroupCell<P>) -> Option<WriteGuard<'_, T, P>>
{
    if !cell.is_alive() || !cell.lock().try_lock_exclusive() {
        return None;
    }
    finish_write(cell)
}

#[cfg(feature = "shared")]
fn read_cell_blocking<T: 'static>(cell: &GroupCell<Shared>) -> Option<ReadGuard<'_, T, Shared>>
{
    if !cell.is_alive() {
        return None;
    }
    cell.lock().lock_shared_blocking();
    finish_read(cell)
}

#[cfg(feature = "shared")]
fn write_cell_blocking<T: 'static>(cell: &GroupCell<Shared>) -> Option<WriteGuard<'_, T, Shared>>
{
    if !cell.is_alive() {
        return None;
    }
    cell.lock().lock_exclusive_blocking();
    finish_write(cell)
}

/// Caller holds the shared side; re-checks liveness and either finishes the
/// guard or backs out of the lock.
fn finish_read<T: 'static, P: Policy>(cell: &GroupCell<P>) -> Option<ReadGuard<'_, T, P>>
{
    if !cell.is_alive() {
        unsafe { cell.lock().unlock_shared() }
        return None;
    }
    match NonNull::new(cell.referent_ptr() as *mut T) {
        Some(ptr) => {
            stats::guard_taken();
            Some(ReadGuard { cell, ptr })
        }
        None => {
            unsafe { cell.lock().unlock_shared() }
            None
        }
    }
}

fn finish_write<T: 'static, P: Policy>(cell: &GroupCell<P>) -> Option<WriteGuard<'_, T, P>>
{
    if !cell.is_alive() {
        unsafe { cell.lock().unlock_exclusive() }
        return None;
    }
    match NonNull::new(cell.referent_ptr() as *mut T) {
        Some(ptr) => {
            stats::guard_taken();
            Some(WriteGuard { cell, ptr })
        }
        None => {
            unsafe { cell.lock().unlock_exclusive() }
            None
        }
    }
}

impl<'a, T: 'static, P: Policy> Deref for ReadGuard<'a, T, P>
{
    type Target = T;

    fn deref(&self) -> &Self::Target { unsafe { self.ptr.as_ref() } }
}

impl<'a, T: 'static, P: Policy> Clone for ReadGuard<'a, T, P>
{
    fn clone(&self) -> Self
    {
        if !self.cell.lock().try_lock_shared() {
            panic!("group lock lost while a read guard was live")
        }
        stats::guard_taken();
        ReadGuard {
            cell: self.cell,
            ptr: self.ptr,
        }
    }
}

impl<'a, T: 'static, P: Policy> Drop for ReadGuard<'a, T, P>
{
    fn drop(&mut self)
    {
        unsafe { self.cell.lock().unlock_shared() }
        stats::guard_released();
    }
}

impl<'a, T: 'static, P: Policy> fmt::Debug for ReadGuard<'a, T, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("ReadGuard").field(&self.ptr).finish()
    }
}

impl<'a, T: 'static, P: Policy> Deref for WriteGuard<'a, T, P>
{
    type Target = T;

    fn deref(&self) -> &Self::Target { unsafe { self.ptr.as_ref() } }
}

impl<'a, T: 'static, P: Policy> DerefMut for WriteGuard<'a, T, P>
{
    fn deref_mut(&mut self) -> &mut Self::Target { unsafe { &mut *self.ptr.as_ptr() } }
}

impl<'a, T: 'static, P: Policy> Drop for WriteGuard<'a, T, P>
{
    fn drop(&mut self)
    {
        unsafe { self.cell.lock().unlock_exclusive() }
        stats::guard_released();
    }
}

impl<'a, T: 'static, P: Policy> fmt::Debug for WriteGuard<'a, T, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("WriteGuard").field(&self.ptr).finish()
    }
}
