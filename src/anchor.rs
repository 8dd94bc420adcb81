use std::{fmt, mem::ManuallyDrop, ptr::NonNull};

use crate::{
    deleter::Deleter,
    pointers::{Owner, ReadGuard, Weak, WriteGuard},
    policy::{Local, Policy},
};

#[cfg(feature = "shared")]
use crate::policy::Shared;

/// A value that can hand out group handles to itself.
///
/// The anchor owns the value outright at a stable heap address and embeds a
/// non-owning `Owner` edge pointing back at it, so the value can be observed
/// through [`Weak`] proxies that die with the anchor rather than with any
/// particular observer. The group never frees the value; the anchor does,
/// which is what the embedded edge's `NoOp` deleter records.
///
/// Dropping the anchor kills every outstanding proxy first, so no proxy can
/// ever observe the value after it is gone.
pub struct Anchored<T: 'static, P: Policy = Local>
{
    value: NonNull<T>,
    handle: Owner<T, P>,
}

#[allow(dead_code)]
impl<T: 'static, P: Policy> Anchored<T, P>
{
    pub fn new(it: T) -> Self
    {
        let value = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(it))) };
        let handle = unsafe { Owner::from_raw(value.as_ptr(), Deleter::NoOp) };
        Anchored { value, handle }
    }

    /// Observation-only handle to the value. Dies when the anchor dies or
    /// is invalidated, never the other way around.
    pub fn proxy(&self) -> Weak<T, P> { self.handle.downgrade() }

    pub fn get(&self) -> *mut T { self.value.as_ptr() }

    /// Live proxies into this anchor, not counting the anchor's own edge.
    pub fn proxy_count(&self) -> usize { self.handle.weak_count() }

    pub fn try_read(&self) -> Option<ReadGuard<'_, T, P>> { self.handle.try_read() }

    pub fn try_write(&self) -> Option<WriteGuard<'_, T, P>> { self.handle.try_write() }

    /// Kills every outstanding proxy while the value lives on; proxies
    /// handed out afterwards observe the value again. The address does not
    /// change.
    pub fn invalidate(&mut self)
    {
        self.handle.destroy();
        self.handle = unsafe { Owner::from_raw(self.value.as_ptr(), Deleter::NoOp) };
    }

    /// Takes the value back out, killing every proxy.
    pub fn into_inner(self) -> T
    {
        let mut this = ManuallyDrop::new(self);
        this.handle.destroy();
        this.handle.reset();
        unsafe { *Box::from_raw(this.value.as_ptr()) }
    }
}

#[cfg(feature = "shared")]
impl<T: 'static> Anchored<T, Shared>
{
    /// Blocking counterpart of [`Anchored::try_read`].
    pub fn read(&self) -> Option<ReadGuard<'_, T, Shared>> { self.handle.read() }

    /// Blocking counterpart of [`Anchored::try_write`].
    pub fn write(&self) -> Option<WriteGuard<'_, T, Shared>> { self.handle.write() }
}

impl<T: 'static, P: Policy> Drop for Anchored<T, P>
{
    fn drop(&mut self)
    {
        // Proxies must observe death before the value is freed.
        self.handle.destroy();
        unsafe { drop(Box::from_raw(self.value.as_ptr())) }
    }
}

impl<T: Default + 'static, P: Policy> Default for Anchored<T, P>
{
    fn default() -> Self { Self::new(T::default()) }
}

impl<T: 'static, P: Policy> fmt::Debug for Anchored<T, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Anchored")
            .field("value", &self.value)
            .field("proxies", &self.proxy_count())
            .finish()
    }
}
