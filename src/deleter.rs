use std::fmt;

/// Deletion strategy for a group's referent.
///
/// Stored with the group state so that teardown can run from code that no
/// longer knows the referent's static type. `NoOp` marks a non-owning edge:
/// the group observes the object but some outside owner frees it, which is
/// how the self-referencing `Anchored` base works.
pub enum Deleter<T>
{
    /// The referent was allocated with `Box::new`; reclaim it the same way.
    Boxed,
    /// Never free the referent through the group.
    NoOp,
    /// Caller-supplied strategy matching a caller-supplied allocation source.
    Custom(Box<dyn FnMut(*mut T) + Send>),
}

impl<T> Deleter<T>
{
    /// Caller asserts `ptr` came from the matching allocation source and is
    /// not freed twice.
    pub(crate) unsafe fn invoke(&mut self, ptr: *mut T)
    {
        match self {
            Deleter::Boxed => drop(Box::from_raw(ptr)),
            Deleter::NoOp => {}
            Deleter::Custom(f) => f(ptr),
        }
    }
}

impl<T> fmt::Debug for Deleter<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            Deleter::Boxed => "Deleter::Boxed",
            Deleter::NoOp => "Deleter::NoOp",
            Deleter::Custom(_) => "Deleter::Custom",
        })
    }
}

/// Type-erased form stored in the group cell.
pub(crate) enum ErasedDeleter
{
    NoOp,
    Drop(unsafe fn(*mut ())),
    Custom(Box<dyn FnMut(*mut ()) + Send>),
}

impl ErasedDeleter
{
    pub(crate) fn erase<T: 'static>(it: Deleter<T>) -> Self
    {
        match it {
            Deleter::Boxed => ErasedDeleter::Drop(drop_boxed::<T>),
            Deleter::NoOp => ErasedDeleter::NoOp,
            Deleter::Custom(mut f) => ErasedDeleter::Custom(Box::new(move |p| f(p as *mut T))),
        }
    }

    /// Caller asserts `ptr` is the referent this deleter was erased for.
    pub(crate) unsafe fn invoke(&mut self, ptr: *mut ())
    {
        match self {
            ErasedDeleter::NoOp => {}
            ErasedDeleter::Drop(f) => f(ptr),
            ErasedDeleter::Custom(f) => f(ptr),
        }
    }
}

unsafe fn drop_boxed<T>(ptr: *mut ()) { drop(Box::from_raw(ptr as *mut T)) }
