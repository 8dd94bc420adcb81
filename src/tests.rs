use std::{cell::Cell, collections::HashSet, rc::Rc};

use crate::{Anchored, Counted, Deleter, Linked, Owner, Weak};

struct DropIncrementer(&'static Cell<i32>);
impl Drop for DropIncrementer
{
    fn drop(&mut self) { self.0.set(self.0.get() + 1); }
}

fn leaked_counter() -> &'static Cell<i32> { Box::leak(Box::new(Cell::new(0))) }

#[test]
fn user_story()
{
    let mut x: Owner<Cell<i32>> = Owner::new(Box::new(Cell::new(2)));

    let y = x.clone();

    assert_eq!(x.strong_count(), 2);
    assert_eq!(x, y);

    let z = y.try_read();

    assert!(z.is_some());

    let z = z.unwrap();

    assert_eq!(z.get(), 2);

    z.set(3);

    std::mem::drop(z);

    assert_eq!(x.try_read().map(|g| g.get()), Some(3));

    x.assign(Box::new(Cell::new(7)));

    assert_eq!(y.try_read().map(|g| g.get()), Some(7));

    y.destroy();

    assert!(x.expired());
    assert!(y.expired());
    assert!(x.get().is_null());
    assert!(x.try_read().is_none());

    assert_eq!(x, y);
}

#[test]
fn assignment_is_visible_to_every_member()
{
    let mut a: Owner<i32> = Owner::new(Box::new(1));
    let b = a.clone();
    let w = b.downgrade();

    a.assign(Box::new(2));

    assert_eq!(b.try_read().map(|g| *g), Some(2));
    assert_eq!(w.try_read().map(|g| *g), Some(2));
    assert_eq!(a.hashkey(), b.hashkey());
}

#[test]
fn assignment_revives_a_dead_group()
{
    let mut a: Owner<i32> = Owner::new(Box::new(1));
    let w = a.downgrade();

    a.destroy();

    assert!(w.expired());
    assert!(w.upgrade().is_none());

    a.assign(Box::new(5));

    assert!(w.alive());
    assert_eq!(w.upgrade().map(|o| o.try_read().map(|g| *g)), Some(Some(5)));
}

#[test]
fn weak_observes_without_keeping_alive()
{
    let counter = leaked_counter();

    let a: Owner<DropIncrementer> = Owner::new(Box::new(DropIncrementer(counter)));
    let w = a.downgrade();

    assert_eq!(a.weak_count(), 1);
    assert!(w.alive());

    std::mem::drop(a);

    assert_eq!(counter.get(), 1);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert!(w.get().is_null());
    assert!(!w.hashkey().is_null());
}

#[test]
fn dead_handles_stay_findable_in_hash_sets()
{
    let owners: Vec<Owner<i32>> = (0..4).map(|i| Owner::new(Box::new(i))).collect();

    let set: HashSet<Owner<i32>> = owners.iter().cloned().collect();

    assert_eq!(set.len(), 4);

    owners[2].destroy();

    assert!(owners[2].expired());
    assert!(set.contains(&owners[2]));
    assert!(set.get(&owners[2]).unwrap().expired());

    for o in &owners {
        assert_eq!(set.get(o).map(|m| m.hashkey()), Some(o.hashkey()));
    }
}

#[test]
fn reset_detaches_one_member_only()
{
    let counter = leaked_counter();

    let mut a: Owner<DropIncrementer> = Owner::new(Box::new(DropIncrementer(counter)));
    let b = a.clone();

    a.reset();

    assert!(a.get().is_null());
    assert!(a.hashkey().is_null());
    assert!(b.alive());
    assert_eq!(b.strong_count(), 1);
    assert_eq!(counter.get(), 0);

    std::mem::drop(b);

    assert_eq!(counter.get(), 1);
}

#[test]
fn empty_handles_are_inert_until_assigned()
{
    let mut e: Owner<i32> = Owner::empty();

    assert!(e.get().is_null());
    assert_eq!(e.strong_count(), 0);
    assert!(e.release().is_null());
    e.destroy();
    assert!(e.downgrade().upgrade().is_none());

    e.assign(Box::new(3));

    assert!(e.alive());
    assert_eq!(e.strong_count(), 1);
    assert_eq!(e.try_read().map(|g| *g), Some(3));
}

#[test]
fn destroy_is_idempotent()
{
    let counter = leaked_counter();

    let a: Owner<DropIncrementer> = Owner::new(Box::new(DropIncrementer(counter)));
    let b = a.clone();

    a.destroy();
    b.destroy();
    a.destroy();

    assert_eq!(counter.get(), 1);
}

#[test]
fn release_hands_the_referent_back()
{
    let counter = leaked_counter();

    let a: Owner<DropIncrementer> = Owner::new(Box::new(DropIncrementer(counter)));
    let b = a.clone();

    let p = a.release();

    assert!(!p.is_null());
    assert!(a.expired());
    assert!(b.expired());
    assert_eq!(a.hashkey(), p);
    assert_eq!(counter.get(), 0);

    // The group no longer owns it; a later destroy must not double-free.
    b.destroy();
    assert_eq!(counter.get(), 0);

    let taken = unsafe { Box::from_raw(p) };
    std::mem::drop(taken);
    assert_eq!(counter.get(), 1);

    assert!(a.release().is_null());
}

#[test]
fn custom_deleter_runs_exactly_once()
{
    use std::sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    };

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();

    let a: Owner<i32> = Owner::with_deleter(
        Box::new(9),
        Deleter::Custom(Box::new(move |p| {
            h.fetch_add(1, SeqCst);
            unsafe { drop(Box::from_raw(p)) }
        })),
    );
    let b = a.clone();

    a.destroy();
    b.destroy();
    std::mem::drop(a);
    std::mem::drop(b);

    assert_eq!(hits.load(SeqCst), 1);
}

#[test]
fn write_guard_mutations_are_seen_by_the_group()
{
    let a: Owner<i32> = Owner::new(Box::new(10));
    let b = a.clone();

    {
        let mut g = a.try_write().unwrap();
        *g += 5;

        // Exclusive means exclusive.
        assert!(b.try_read().is_none());
        assert!(b.try_write().is_none());
    }

    assert_eq!(b.try_read().map(|g| *g), Some(15));
}

#[test]
fn read_guards_share()
{
    let a: Owner<i32> = Owner::new(Box::new(1));
    let b = a.clone();

    let g1 = a.try_read().unwrap();
    let g2 = b.try_read().unwrap();
    let g3 = g1.clone();

    assert_eq!(*g1 + *g2 + *g3, 3);
    assert!(a.try_write().is_none());
}

#[test]
#[should_panic(expected = "group mutated while a guard into it is live")]
fn mutating_under_a_live_guard_is_a_logic_error()
{
    let a: Owner<i32> = Owner::new(Box::new(1));
    let b = a.clone();

    let _g = a.try_read().unwrap();

    b.destroy();
}

#[test]
fn downcast_shares_the_group()
{
    let a: Owner<u32> = Owner::new(Box::new(7));

    let erased = unsafe { a.cast::<()>() };

    assert_eq!(erased.hashkey() as *mut u32, a.hashkey());
    assert_eq!(a.strong_count(), 2);

    assert!(erased.downcast::<i64>().is_none());

    let back = erased.downcast::<u32>().unwrap();
    assert_eq!(back.try_read().map(|g| *g), Some(7));

    // Still one group: destroying through the cast kills the source.
    back.destroy();
    assert!(a.expired());
    assert!(erased.downcast::<u32>().is_none());
}

#[test]
fn cast_reinterprets_transparent_wrappers()
{
    #[repr(transparent)]
    struct Meters(f64);

    let a: Owner<f64> = Owner::new(Box::new(2.5));

    let m = unsafe { a.cast::<Meters>() };

    assert_eq!(m.try_read().map(|g| g.0), Some(2.5));

    m.destroy();
    assert!(a.expired());
}

#[test]
fn weak_downcast_mirrors_owner_downcast()
{
    let a: Owner<u32> = Owner::new(Box::new(3));
    let erased = unsafe { a.cast::<()>() };
    let w = erased.downgrade();

    let back: Weak<u32> = w.downcast::<u32>().unwrap();
    assert_eq!(back.upgrade().map(|o| o.try_read().map(|g| *g)), Some(Some(3)));

    a.destroy();
    assert!(w.downcast::<u32>().is_none());
}

#[test]
fn anchored_hands_out_proxies_to_itself()
{
    let anchor: Anchored<i32> = Anchored::new(5);

    let p = anchor.proxy();
    let q = anchor.proxy();

    assert_eq!(anchor.proxy_count(), 2);
    assert!(p.alive());
    assert_eq!(p.try_read().map(|g| *g), Some(5));
    assert_eq!(p.hashkey(), anchor.get());
    assert_eq!(p, q);

    std::mem::drop(anchor);

    assert!(p.expired());
    assert!(p.upgrade().is_none());
    assert!(q.expired());
}

#[test]
fn anchored_value_outlives_its_proxies()
{
    let counter = leaked_counter();

    let anchor: Anchored<DropIncrementer> = Anchored::new(DropIncrementer(counter));
    let p = anchor.proxy();

    // Proxies never own: upgrading and dropping must not free the value.
    let strong = p.upgrade().unwrap();
    std::mem::drop(strong);
    std::mem::drop(p);

    assert_eq!(counter.get(), 0);

    std::mem::drop(anchor);

    assert_eq!(counter.get(), 1);
}

#[test]
fn anchored_invalidate_revokes_without_moving()
{
    let mut anchor: Anchored<i32> = Anchored::new(1);
    let addr = anchor.get();

    let old = anchor.proxy();
    anchor.invalidate();

    assert!(old.expired());
    assert_eq!(anchor.get(), addr);

    let fresh = anchor.proxy();
    assert!(fresh.alive());
    assert_eq!(fresh.try_read().map(|g| *g), Some(1));
}

#[test]
fn anchored_into_inner_takes_the_value_back()
{
    let anchor: Anchored<String> = Anchored::new("payload".to_string());
    let p = anchor.proxy();

    let value = anchor.into_inner();

    assert_eq!(value, "payload");
    assert!(p.expired());
}

#[test]
fn linked_members_share_one_binding()
{
    let a: Linked<i32> = Linked::new(Box::new(7));
    let b = a.clone();
    let c = b.clone();

    assert_eq!(a.group_len(), 3);
    assert!(a.is_head());
    assert!(!b.is_head());
    assert_eq!(a.get(), c.get());
    assert_eq!(a, c);

    a.assign(Box::new(8));

    assert_eq!(unsafe { *b.get() }, 8);

    c.destroy();

    assert!(a.is_null());
    assert!(b.is_null());
}

#[test]
fn linked_head_migrates_on_detach()
{
    let mut a: Linked<i32> = Linked::new(Box::new(7));
    let b = a.clone();
    let c = a.clone();
    let referent = a.get();

    a.detach();

    // Exactly one surviving member is the head, and the binding held.
    assert!(b.is_head() ^ c.is_head());
    assert!(b.is_head());
    assert_eq!(b.group_len(), 2);
    assert_eq!(b.get(), referent);
    assert_eq!(unsafe { *c.get() }, 7);

    // The detached member is an independent empty singleton.
    assert!(a.is_null());
    assert!(a.is_head());
    assert!(a.is_orphan());
    assert_eq!(a.group_len(), 1);
}

#[test]
fn linked_detach_to_picks_the_successor()
{
    let mut a: Linked<i32> = Linked::new(Box::new(1));
    let b = a.clone();
    let c = a.clone();

    a.detach_to(&c);

    assert!(c.is_head());
    assert!(!b.is_head());
    assert_eq!(c.group_len(), 2);
}

#[test]
fn linked_detach_to_stranger_falls_back_to_election()
{
    let mut a: Linked<i32> = Linked::new(Box::new(1));
    let b = a.clone();
    let stranger: Linked<i32> = Linked::new(Box::new(2));

    a.detach_to(&stranger);

    assert!(b.is_head());
    assert!(b.is_orphan());
    assert!(stranger.is_head());
}

#[test]
fn linked_promote_swaps_headship()
{
    let a: Linked<i32> = Linked::new(Box::new(1));
    let b = a.clone();

    b.promote();

    assert!(b.is_head());
    assert!(!a.is_head());
    assert_eq!(a.group_len(), 2);

    // A no-op on the sitting head.
    b.promote();
    assert!(b.is_head());
}

#[test]
fn linked_last_member_out_frees_exactly_once()
{
    let counter = leaked_counter();

    let mut a: Linked<DropIncrementer> = Linked::new(Box::new(DropIncrementer(counter)));
    let b = a.clone();
    let c = a.clone();

    a.detach();
    assert_eq!(counter.get(), 0);

    std::mem::drop(b);
    assert_eq!(counter.get(), 0);

    std::mem::drop(c);
    assert_eq!(counter.get(), 1);
}

#[test]
fn linked_detach_of_a_singleton_tears_down_and_rearms()
{
    let counter = leaked_counter();

    let mut a: Linked<DropIncrementer> = Linked::new(Box::new(DropIncrementer(counter)));

    a.detach();

    assert_eq!(counter.get(), 1);
    assert!(a.is_null());
    assert!(a.is_head());
    assert!(a.is_orphan());
    assert_eq!(a.group_len(), 1);

    // The rearmed handle heads a fresh, fully working group.
    a.assign(Box::new(DropIncrementer(counter)));
    assert_eq!(counter.get(), 1);

    std::mem::drop(a);
    assert_eq!(counter.get(), 2);
}

#[test]
fn linked_release_hands_the_referent_back()
{
    let a: Linked<i32> = Linked::new(Box::new(4));
    let b = a.clone();

    let p = a.release();

    assert!(!p.is_null());
    assert!(b.is_null());
    assert!(a.release().is_null());

    unsafe { drop(Box::from_raw(p)) }
}

#[test]
fn linked_notifiers_fire_on_group_mutation()
{
    let a: Linked<i32> = Linked::new(Box::new(1));
    let b = a.clone();

    let seen = Rc::new(Cell::new(std::ptr::null_mut::<i32>()));
    let s = seen.clone();
    b.set_notifier(move |p| s.set(p));

    a.assign(Box::new(2));
    assert_eq!(seen.get(), a.get());

    a.destroy();
    assert!(seen.get().is_null());
}

#[test]
fn linked_detach_unenrolls_the_notifier()
{
    let a: Linked<i32> = Linked::new(Box::new(1));
    let mut b = a.clone();

    let fired = Rc::new(Cell::new(0));
    let f = fired.clone();
    b.set_notifier(move |_| f.set(f.get() + 1));

    a.assign(Box::new(2));
    assert_eq!(fired.get(), 1);

    b.detach();
    a.assign(Box::new(3));
    assert_eq!(fired.get(), 1);
}

#[test]
fn counted_handles_cross_threads()
{
    use std::sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    };

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();

    let a: Owner<String, Counted> = Owner::with_deleter(
        Box::new("payload".to_string()),
        Deleter::Custom(Box::new(move |p| {
            h.fetch_add(1, SeqCst);
            unsafe { drop(Box::from_raw(p)) }
        })),
    );
    let b = a.clone();

    std::thread::spawn(move || {
        assert!(b.alive());
        // Counted grants no guards; dereference is the caller's contract.
        assert!(b.try_read().is_none());
        assert!(b.try_write().is_none());
        std::mem::drop(b);
    })
    .join()
    .unwrap();

    assert!(a.alive());
    assert_eq!(a.strong_count(), 1);
    assert_eq!(hits.load(SeqCst), 0);

    std::mem::drop(a);
    assert_eq!(hits.load(SeqCst), 1);
}

#[test]
fn counted_upgrade_races_the_last_owner_out()
{
    use std::sync::{Arc, Barrier};

    for _ in 0..10_000 {
        let a: Owner<u8, Counted> = Owner::new(Box::new(7));
        let w = a.downgrade();

        let barrier = Arc::new(Barrier::new(2));
        let b = barrier.clone();
        let t = std::thread::spawn(move || {
            b.wait();
            std::mem::drop(a);
        });

        barrier.wait();
        // Either the upgrade wins a real strong edge or it fails cleanly;
        // it must never revive a count the departing owner saw hit zero.
        if let Some(o) = w.upgrade() {
            assert!(!o.hashkey().is_null());
        }
        t.join().unwrap();

        assert!(w.upgrade().is_none());
    }
}

#[cfg(feature = "shared")]
mod shared
{
    use crate::{Owner, Shared};

    #[test]
    fn readers_drain_out_after_a_cross_thread_destroy()
    {
        let a: Owner<i32, Shared> = Owner::new(Box::new(42));
        let b = a.clone();

        let reader = std::thread::spawn(move || {
            while let Some(g) = b.read() {
                assert_eq!(*g, 42);
            }
            assert!(b.expired());
        });

        a.destroy();
        reader.join().unwrap();

        assert!(a.expired());
        assert!(a.read().is_none());
    }

    #[test]
    fn write_guards_serialize_across_threads()
    {
        let a: Owner<i32, Shared> = Owner::new(Box::new(0));
        let n = 1000;

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let h = a.clone();
                std::thread::spawn(move || {
                    for _ in 0..n {
                        *h.write().unwrap() += 1;
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(a.read().map(|g| *g), Some(2 * n));
    }

    #[test]
    fn try_variants_fail_fast_under_contention()
    {
        let a: Owner<i32, Shared> = Owner::new(Box::new(1));

        let g = a.read().unwrap();
        assert!(a.try_write().is_none());
        assert!(a.try_read().is_some());
        std::mem::drop(g);

        let w = a.write().unwrap();
        assert!(a.try_read().is_none());
        std::mem::drop(w);
    }
}

#[cfg(feature = "stats")]
mod diagnostics
{
    use crate::{stats, Linked, Owner};

    #[test]
    fn thread_registry_tracks_groups_and_guards()
    {
        let base = stats::thread_stats();

        let a: Owner<i32> = Owner::new(Box::new(1));
        let w = a.downgrade();

        assert_eq!(stats::thread_stats().live_groups, base.live_groups + 1);

        let g = a.try_read().unwrap();
        assert_eq!(stats::thread_stats().guards, base.guards + 1);
        std::mem::drop(g);
        assert_eq!(stats::thread_stats().guards, base.guards);

        std::mem::drop(a);

        // The weak observer still pins the group record.
        assert_eq!(stats::thread_stats().live_groups, base.live_groups + 1);

        std::mem::drop(w);
        assert_eq!(stats::thread_stats().live_groups, base.live_groups);
        assert!(stats::thread_stats().peak_groups > base.live_groups);
    }

    #[test]
    fn thread_registry_tracks_rosters()
    {
        let base = stats::thread_stats();

        let a: Linked<i32> = Linked::new(Box::new(1));
        let b = a.clone();

        assert_eq!(stats::thread_stats().live_rosters, base.live_rosters + 1);

        std::mem::drop(a);
        assert_eq!(stats::thread_stats().live_rosters, base.live_rosters + 1);

        std::mem::drop(b);
        assert_eq!(stats::thread_stats().live_rosters, base.live_rosters);
    }

    #[cfg(feature = "shared")]
    #[test]
    fn shared_groups_land_in_the_global_registry()
    {
        use crate::Shared;

        let local = stats::thread_stats();
        let a: Owner<i32, Shared> = Owner::new(Box::new(1));

        // Not tallied locally, and the global registry has seen it.
        assert_eq!(stats::thread_stats().live_groups, local.live_groups);
        assert!(stats::shared_stats().peak_groups >= 1);

        std::mem::drop(a);
    }
}
