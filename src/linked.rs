use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    hash::{Hash, Hasher},
    ptr::NonNull,
    rc::Rc,
};

use crate::{deleter::Deleter, stats};

/// Opaque membership ticket within one roster. Ids are minted per roster
/// and never reused, so a stale ticket can't impersonate a later member.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
struct PeerId(u64);

/// Bookkeeping shared by every member of one linked group.
///
/// `peers` holds precisely the non-head members; the head is tracked
/// separately and is never simultaneously a peer. All head migration goes
/// through [`Linked::leave`], the single place that decides succession.
struct Roster<T>
{
    peers: RefCell<HashSet<PeerId>>,
    head: Cell<PeerId>,
    next_id: Cell<u64>,
    referent: Cell<*mut T>,
    deleter: RefCell<Deleter<T>>,
    notifiers: RefCell<HashMap<PeerId, Rc<dyn Fn(*mut T)>>>,
}

impl<T> Roster<T>
{
    fn allocate(ptr: *mut T, deleter: Deleter<T>) -> (NonNull<Self>, PeerId)
    {
        let head = PeerId(0);
        let roster = Roster {
            peers: RefCell::new(HashSet::new()),
            head: Cell::new(head),
            next_id: Cell::new(1),
            referent: Cell::new(ptr),
            deleter: RefCell::new(deleter),
            notifiers: RefCell::new(HashMap::new()),
        };
        stats::roster_created();
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(roster))) };
        (ptr, head)
    }

    /// Caller asserts no member remains.
    unsafe fn free(this: NonNull<Self>)
    {
        stats::roster_freed();
        drop(Box::from_raw(this.as_ptr()));
    }

    fn mint_id(&self) -> PeerId
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        PeerId(id)
    }

    fn delete_referent(&self)
    {
        let ptr = self.referent.replace(std::ptr::null_mut());
        if !ptr.is_null() {
            unsafe { self.deleter.borrow_mut().invoke(ptr) }
        }
    }

    /// Runs every enrolled callback with the group's new referent. The
    /// notifier map is not borrowed during the calls, so a callback may
    /// enroll or detach peers.
    fn notify(&self, ptr: *mut T)
    {
        let fns: Vec<Rc<dyn Fn(*mut T)>> = self.notifiers.borrow().values().cloned().collect();
        for f in fns {
            f(ptr)
        }
    }
}

/// Member of a linked group over one shared referent.
///
/// Cloning enrolls a new member; `assign`, `destroy` and `release` act on
/// the whole group and every member observes the result immediately. One
/// member is the head; when the head detaches, headship migrates to a
/// surviving peer (smallest ticket, or a caller-chosen successor via
/// [`Linked::detach_to`]). The referent is freed exactly once, by the last
/// member out.
///
/// Single-threaded, like `Owner<T, Local>`.
pub struct Linked<T: 'static>
{
    roster: NonNull<Roster<T>>,
    id: PeerId,
}

#[allow(dead_code)]
impl<T: 'static> Linked<T>
{
    /// New group of one, owning `it`.
    pub fn new(it: Box<T>) -> Self
    {
        unsafe { Self::from_raw(Box::into_raw(it), Deleter::Boxed) }
    }

    /// New group of one, pointing at nothing.
    pub fn new_empty() -> Self
    {
        unsafe { Self::from_raw(std::ptr::null_mut(), Deleter::NoOp) }
    }

    /// New group of one over a caller-allocated referent; caller asserts
    /// `ptr` stays valid until the deleter runs and that the deleter matches
    /// the allocation source.
    pub unsafe fn from_raw(ptr: *mut T, deleter: Deleter<T>) -> Self
    {
        let (roster, id) = Roster::allocate(ptr, deleter);
        Linked { roster, id }
    }

    /// Current referent, or null when the group points at nothing.
    pub fn get(&self) -> *mut T { self.roster_ref().referent.get() }

    pub fn is_null(&self) -> bool { self.get().is_null() }

    pub fn is_head(&self) -> bool { self.roster_ref().head.get() == self.id }

    /// True when this member is the group's only member.
    pub fn is_orphan(&self) -> bool { self.roster_ref().peers.borrow().is_empty() }

    /// Members in the group, this one included.
    pub fn group_len(&self) -> usize { self.roster_ref().peers.borrow().len() + 1 }

    /// Rebinds the whole group to a fresh referent and fires every
    /// enrolled notifier with the new pointer.
    pub fn assign(&self, it: Box<T>)
    {
        unsafe { self.assign_raw(Box::into_raw(it), Deleter::Boxed) }
    }

    /// `assign` over a caller-allocated referent; same contract as
    /// [`Linked::from_raw`].
    pub unsafe fn assign_raw(&self, ptr: *mut T, deleter: Deleter<T>)
    {
        let roster = self.roster_ref();
        roster.delete_referent();
        roster.referent.set(ptr);
        *roster.deleter.borrow_mut() = deleter;
        roster.notify(ptr);
    }

    /// Destroys the referent for the whole group; every member goes null.
    /// Idempotent.
    pub fn destroy(&self)
    {
        let roster = self.roster_ref();
        roster.delete_referent();
        roster.notify(std::ptr::null_mut());
    }

    /// Un-assigns the group's referent without running the deleter; the
    /// caller now owns cleanup. Null when the group already pointed at
    /// nothing.
    pub fn release(&self) -> *mut T
    {
        let roster = self.roster_ref();
        let ptr = roster.referent.replace(std::ptr::null_mut());
        roster.notify(std::ptr::null_mut());
        ptr
    }

    /// Leaves the group and becomes an independent empty singleton. A
    /// departing head hands headship to the surviving peer with the
    /// smallest ticket; the last member out tears the group down, running
    /// the deleter exactly once.
    pub fn detach(&mut self)
    {
        self.leave(None);
        self.rearm();
    }

    /// `detach` with a caller-chosen successor head. Falls back to the
    /// ordinary election when `successor` belongs to another group, and to
    /// a plain detach when this member isn't the head.
    pub fn detach_to(&mut self, successor: &Linked<T>)
    {
        let chosen = if successor.roster == self.roster && successor.id != self.id {
            Some(successor.id)
        } else {
            None
        };
        self.leave(chosen);
        self.rearm();
    }

    /// Makes this member the head without anyone detaching; the former
    /// head becomes an ordinary peer.
    pub fn promote(&self)
    {
        let roster = self.roster_ref();
        let old = roster.head.get();
        if old == self.id {
            return;
        }
        let mut peers = roster.peers.borrow_mut();
        peers.remove(&self.id);
        peers.insert(old);
        drop(peers);
        roster.head.set(self.id);
    }

    /// Enrolls a callback fired with the group's new referent on every
    /// group-wide mutation. One per member; detaching removes it.
    pub fn set_notifier(&self, f: impl Fn(*mut T) + 'static)
    {
        self.roster_ref()
            .notifiers
            .borrow_mut()
            .insert(self.id, Rc::new(f));
    }

    pub fn clear_notifier(&self)
    {
        self.roster_ref().notifiers.borrow_mut().remove(&self.id);
    }

    /// Removes this member from the roster, migrating headship if needed.
    /// The member must not touch the roster again afterwards.
    fn leave(&mut self, successor: Option<PeerId>)
    {
        let roster = self.roster_ref();
        roster.notifiers.borrow_mut().remove(&self.id);
        if roster.head.get() != self.id {
            roster.peers.borrow_mut().remove(&self.id);
            return;
        }
        let next = {
            let mut peers = roster.peers.borrow_mut();
            let chosen = successor
                .filter(|s| peers.contains(s))
                .or_else(|| peers.iter().min().copied());
            if let Some(next) = chosen {
                peers.remove(&next);
            }
            chosen
        };
        match next {
            Some(next) => roster.head.set(next),
            None => {
                roster.delete_referent();
                unsafe { Roster::free(self.roster) }
            }
        }
    }

    /// Becomes a fresh empty singleton after leaving a group.
    fn rearm(&mut self)
    {
        let fresh = Linked::new_empty();
        self.roster = fresh.roster;
        self.id = fresh.id;
        std::mem::forget(fresh);
    }

    fn roster_ref(&self) -> &Roster<T> { unsafe { self.roster.as_ref() } }
}

impl<T: 'static> Clone for Linked<T>
{
    /// Enrolls a new member in the same group.
    fn clone(&self) -> Self
    {
        let roster = self.roster_ref();
        let id = roster.mint_id();
        roster.peers.borrow_mut().insert(id);
        Linked {
            roster: self.roster,
            id,
        }
    }
}

impl<T: 'static> Drop for Linked<T>
{
    fn drop(&mut self) { self.leave(None) }
}

impl<T: 'static> Default for Linked<T>
{
    fn default() -> Self { Self::new_empty() }
}

impl<T: 'static> PartialEq for Linked<T>
{
    fn eq(&self, other: &Self) -> bool { self.get() == other.get() }
}
impl<T: 'static> Eq for Linked<T> {}

impl<T: 'static> Hash for Linked<T>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.get().hash(state) }
}

impl<T: 'static> fmt::Debug for Linked<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Linked")
            .field("referent", &self.get())
            .field("head", &self.is_head())
            .field("group_len", &self.group_len())
            .finish()
    }
}
