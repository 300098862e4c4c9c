use std::{
    borrow::Borrow,
    cell::Cell,
    collections::{hash_map::DefaultHasher, BTreeMap},
    hash::{Hash, Hasher},
    rc::Rc,
};

use pretty_assertions::assert_eq;
use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::{Error, Shared, Weak};

assert_not_impl_any!(Shared<u8>: Send, Sync);
assert_not_impl_any!(Weak<u8>: Send, Sync);
assert_not_impl_any!(Shared<i32>: Borrow<i32>);
assert_impl_all!(Error: Send, Sync, Copy, std::error::Error);

/// Counts how many times a payload was dropped.
struct DetectDrop {
    drops: Rc<Cell<usize>>,
}

impl DetectDrop {
    fn new() -> (Self, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));
        (
            DetectDrop {
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl Drop for DetectDrop {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn default_is_empty() {
    let shared = Shared::<i32>::default();
    assert!(Shared::as_ptr(&shared).is_null());
    assert!(Shared::is_empty(&shared));
    assert!(!Shared::is_some(&shared));
    assert_eq!(Shared::use_count(&shared), 0);
    assert_eq!(Shared::weak_count(&shared), 0);

    let shared = Shared::<String>::default();
    assert!(Shared::get(&shared).is_none());
}

#[test]
fn new_round_trip() {
    let shared = Shared::new(5);
    assert_eq!(*shared, 5);
    assert_eq!(Shared::use_count(&shared), 1);

    let shared = Shared::new(String::from("hello world"));
    assert_eq!(*shared, "hello world");
    assert_eq!(Shared::try_deref(&shared).map(String::as_str), Ok("hello world"));
}

#[test]
fn empty_dereference_is_an_error() {
    let shared = Shared::<String>::empty();
    assert_eq!(Shared::try_deref(&shared), Err(Error::EmptyDereference));
}

#[test]
#[should_panic(expected = "dereferenced an empty shared handle")]
fn empty_deref_panics() {
    let shared = Shared::<i32>::empty();
    let _value = *shared;
}

#[test]
#[should_panic(expected = "dereferenced an empty shared handle")]
fn empty_as_ref_panics() {
    let shared = Shared::<String>::empty();
    let _len = AsRef::<String>::as_ref(&shared).len();
}

#[test]
fn construct_from_weak() {
    let first = Shared::new(String::from("hello"));
    let weak = Weak::from(&first);

    let second: Shared<String> = Shared::from(&weak);
    assert_eq!(*second, "hello");
    assert_eq!(Shared::use_count(&second), 2);
}

#[test]
fn construct_from_expired_weak_is_empty() {
    let weak = Shared::downgrade(&Shared::new(5));
    assert!(weak.expired());

    let shared: Shared<i32> = Shared::from(&weak);
    assert!(Shared::is_empty(&shared));
    assert!(Shared::as_ptr(&shared).is_null());
}

#[test]
fn clone_shares_the_value() {
    let first = Shared::new(String::from("hello world"));
    let second = first.clone();
    assert_eq!(*second, "hello world");
    assert!(Shared::ptr_eq(&first, &second));
    assert_eq!(Shared::as_ptr(&first), Shared::as_ptr(&second));
}

#[test]
fn clone_of_empty_is_empty() {
    let first = Shared::<i32>::empty();
    let second = first.clone();
    assert!(Shared::is_empty(&second));
}

#[test]
fn nested_copies_track_use_count() {
    let base = Shared::new(5);
    assert_eq!(Shared::use_count(&base), 1);
    {
        let second = base.clone();
        assert_eq!(Shared::use_count(&base), 2);
        {
            let _third = second.clone();
            assert_eq!(Shared::use_count(&base), 3);
        }
        assert_eq!(Shared::use_count(&base), 2);
    }
    assert_eq!(Shared::use_count(&base), 1);
}

#[test]
fn n_copies_give_use_count_n() {
    let base = Shared::new(1u8);
    let mut copies: Vec<Shared<u8>> = (0..9).map(|_| base.clone()).collect();
    assert_eq!(Shared::use_count(&base), 10);

    copies.pop();
    assert_eq!(Shared::use_count(&base), 9);
    assert!(copies.iter().all(|copy| Shared::use_count(copy) == 9));
}

#[test]
fn assign_into_empty() {
    let first = Shared::new(5);
    let mut second: Shared<i32> = Shared::empty();
    second.clone_from(&first);
    assert_eq!(*second, 5);
    assert_eq!(Shared::use_count(&first), 2);
}

#[test]
fn assign_releases_previous_referent() {
    let (payload, drops) = DetectDrop::new();
    let mut target = Shared::new(payload);
    let weak = Shared::downgrade(&target);

    let (other, other_drops) = DetectDrop::new();
    let source = Shared::new(other);
    target.clone_from(&source);

    assert_eq!(drops.get(), 1);
    assert!(weak.expired());
    assert_eq!(other_drops.get(), 0);
    assert_eq!(Shared::use_count(&source), 2);
}

#[test]
fn same_block_assignment_is_a_noop() {
    let (payload, drops) = DetectDrop::new();
    let first = Shared::new(payload);
    let mut second = first.clone();

    second.clone_from(&first);
    assert_eq!(Shared::use_count(&first), 2);
    assert_eq!(drops.get(), 0);

    let weak = Shared::downgrade(&first);
    Shared::assign_from_weak(&mut second, &weak);
    assert_eq!(Shared::use_count(&first), 2);
    assert_eq!(Shared::weak_count(&first), 1);
    assert_eq!(drops.get(), 0);
}

#[test]
fn assign_from_weak_promotes() {
    let first = Shared::new(String::from("hello"));
    let weak = Shared::downgrade(&first);

    let mut second = Shared::empty();
    Shared::assign_from_weak(&mut second, &weak);
    assert_eq!(*second, "hello");
    assert_eq!(Shared::use_count(&second), 2);
}

#[test]
fn assign_from_expired_weak_empties_the_handle() {
    let (payload, drops) = DetectDrop::new();
    let mut target = Shared::new(payload);
    let expired = Shared::downgrade(&Shared::new(7));

    Shared::assign_from_weak(&mut target, &expired);
    assert!(Shared::is_empty(&target));
    assert_eq!(drops.get(), 1);
}

#[test]
fn reset_releases_the_value() {
    let (payload, drops) = DetectDrop::new();
    let mut shared = Shared::new(payload);
    Shared::reset(&mut shared);
    assert!(Shared::is_empty(&shared));
    assert_eq!(drops.get(), 1);

    Shared::reset(&mut shared);
    assert_eq!(drops.get(), 1);
}

#[test]
fn weak_default_is_expired() {
    let weak = Weak::<i32>::default();
    assert!(weak.expired());
    assert_eq!(weak.use_count(), 0);
    assert_eq!(weak.weak_count(), 0);
    assert!(weak.upgrade().is_none());

    let weak = Weak::<String>::new();
    assert!(Shared::is_empty(&weak.lock()));
}

#[test]
fn weak_from_shared() {
    let shared = Shared::new(String::from("hello world!"));
    let weak = Weak::from(&shared);
    assert!(!weak.expired());
    assert_eq!(weak.use_count(), 1);
    assert_eq!(Shared::weak_count(&shared), 1);

    let empty = Weak::from(&Shared::<String>::empty());
    assert!(empty.expired());
}

#[test]
fn weak_copy() {
    let shared = Shared::new(5);
    let first = Shared::downgrade(&shared);
    let second = first.clone();

    assert!(!second.expired());
    assert_eq!(second.use_count(), 1);
    assert!(first.ptr_eq(&second));
    assert_eq!(Shared::weak_count(&shared), 2);
}

#[test]
fn weak_assignment() {
    let shared = Shared::new(String::from("hello"));
    let mut from_shared = Weak::new();
    from_shared.assign_from_shared(&shared);
    assert!(!from_shared.expired());
    assert_eq!(from_shared.use_count(), 1);

    let mut from_weak = Weak::new();
    from_weak.clone_from(&from_shared);
    assert!(!from_weak.expired());
    assert_eq!(from_weak.use_count(), 1);
    assert_eq!(Shared::weak_count(&shared), 2);

    // Same block: nothing changes.
    from_weak.clone_from(&from_shared);
    from_weak.assign_from_shared(&shared);
    assert_eq!(Shared::weak_count(&shared), 2);
}

#[test]
fn weak_reassignment_releases_previous_block() {
    let old = Shared::new(1);
    let new = Shared::new(2);
    let mut weak = Shared::downgrade(&old);

    weak.assign_from_shared(&new);
    assert_eq!(Shared::weak_count(&old), 0);
    assert_eq!(Shared::weak_count(&new), 1);
    assert_eq!(*weak.lock(), 2);
}

/// Records, when dropped, how many strong handles the watched value has at that moment.
struct Witness {
    watched: Weak<Witness>,
    seen: Rc<Cell<Option<usize>>>,
}

impl Drop for Witness {
    fn drop(&mut self) {
        self.seen.set(Some(self.watched.use_count()));
    }
}

fn witness_pair() -> (Shared<Witness>, Shared<Witness>, Rc<Cell<Option<usize>>>) {
    let source = Shared::new(Witness {
        watched: Weak::new(),
        seen: Rc::new(Cell::new(None)),
    });
    let seen = Rc::new(Cell::new(None));
    let target = Shared::new(Witness {
        watched: Shared::downgrade(&source),
        seen: seen.clone(),
    });
    (source, target, seen)
}

#[test]
fn assign_drops_previous_value_before_sharing_the_new_one() {
    let (source, mut target, seen) = witness_pair();

    target.clone_from(&source);
    assert_eq!(seen.get(), Some(1));
    assert_eq!(Shared::use_count(&source), 2);
    assert!(Shared::ptr_eq(&target, &source));
}

#[test]
fn assign_from_weak_drops_previous_value_before_promoting() {
    let (source, mut target, seen) = witness_pair();
    let weak = Shared::downgrade(&source);

    Shared::assign_from_weak(&mut target, &weak);
    assert_eq!(seen.get(), Some(1));
    assert_eq!(Shared::use_count(&source), 2);
    assert!(Shared::ptr_eq(&target, &source));
}

#[test]
fn lock_adds_exactly_one_owner() {
    let shared = Shared::new(String::from("hello"));
    let weak = Shared::downgrade(&shared);
    let _other_weak = weak.clone();

    let before = Shared::use_count(&shared);
    let locked = weak.lock();
    assert_eq!(Shared::use_count(&shared), before + 1);
    assert_eq!(*locked, *shared);
    assert!(Shared::ptr_eq(&locked, &shared));

    drop(locked);
    assert_eq!(Shared::use_count(&shared), before);
}

#[test]
fn locked_handles_are_interchangeable() {
    let (payload, drops) = DetectDrop::new();
    let original = Shared::new(payload);
    let weak = Shared::downgrade(&original);
    let locked = weak.lock();

    drop(original);
    assert_eq!(Shared::use_count(&locked), 1);
    assert!(!weak.expired());
    assert_eq!(drops.get(), 0);

    drop(locked);
    assert!(weak.expired());
    assert_eq!(drops.get(), 1);
}

#[test]
fn last_strong_drop_expires_weak_handles() {
    let (payload, drops) = DetectDrop::new();
    let shared = Shared::new(payload);
    let weak = Shared::downgrade(&shared);
    let weak2 = weak.clone();

    drop(shared);
    assert!(weak.expired());
    assert!(weak2.expired());
    assert_eq!(weak.use_count(), 0);
    assert!(Shared::is_empty(&weak.lock()));
    assert_eq!(drops.get(), 1);

    drop(weak);
    drop(weak2);
    assert_eq!(drops.get(), 1);
}

#[test]
fn strong_and_weak_scenario() {
    let s1 = Shared::new(5);
    assert_eq!(Shared::use_count(&s1), 1);

    let w = Weak::from(&s1);
    assert!(!w.expired());
    assert_eq!(w.use_count(), 1);

    let s2 = s1.clone();
    assert_eq!(Shared::use_count(&s2), 2);

    drop(s1);
    assert_eq!(Shared::use_count(&s2), 1);
    assert!(!w.expired());

    drop(s2);
    assert!(w.expired());
    assert!(Shared::is_empty(&w.lock()));
}

#[test]
fn try_unwrap_moves_the_value_out() {
    let (payload, drops) = DetectDrop::new();
    let shared = Shared::new(payload);
    let weak = Shared::downgrade(&shared);

    let value = Shared::try_unwrap(shared).ok().expect("only owner");
    assert!(weak.expired());
    assert_eq!(drops.get(), 0);

    drop(value);
    assert_eq!(drops.get(), 1);
}

#[test]
fn try_unwrap_refuses_shared_and_empty() {
    let shared = Shared::new(3);
    let other = shared.clone();
    let shared = Shared::try_unwrap(shared).unwrap_err();
    assert_eq!(Shared::use_count(&other), 2);
    drop(shared);

    assert!(Shared::try_unwrap(Shared::<i32>::empty()).is_err());
}

#[test]
fn into_inner_hands_the_value_to_the_last_caller() {
    let (payload, drops) = DetectDrop::new();
    let first = Shared::new(payload);
    let second = first.clone();
    let weak = Shared::downgrade(&first);

    assert!(Shared::into_inner(first).is_none());
    assert_eq!(drops.get(), 0);
    assert_eq!(weak.use_count(), 1);

    let value = Shared::into_inner(second);
    assert!(value.is_some());
    assert!(weak.expired());
    assert_eq!(drops.get(), 0);

    drop(value);
    assert_eq!(drops.get(), 1);
    assert!(Shared::into_inner(Shared::<i32>::empty()).is_none());
}

#[test]
fn get_mut_requires_unique_ownership() {
    let mut shared = Shared::new(1);
    *Shared::get_mut(&mut shared).unwrap() = 2;
    assert_eq!(*shared, 2);

    let other = shared.clone();
    assert!(Shared::get_mut(&mut shared).is_none());
    drop(other);

    let weak = Shared::downgrade(&shared);
    assert!(Shared::get_mut(&mut shared).is_none());
    drop(weak);
    assert!(Shared::get_mut(&mut shared).is_some());

    assert!(Shared::get_mut(&mut Shared::<i32>::empty()).is_none());
}

struct Node {
    me: Weak<Node>,
    seen_expired: bool,
    drops: Rc<Cell<usize>>,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn new_cyclic_links_to_itself() {
    let drops = Rc::new(Cell::new(0));
    let node = Shared::new_cyclic(|me| Node {
        me: me.clone(),
        seen_expired: me.expired() && me.upgrade().is_none(),
        drops: drops.clone(),
    });

    assert!(node.seen_expired);
    assert_eq!(Shared::use_count(&node), 1);
    assert_eq!(Shared::weak_count(&node), 1);
    assert!(Shared::ptr_eq(&node, &node.me.lock()));

    // The payload owns the last weak handle; dropping it must not free the block mid-drop.
    drop(node);
    assert_eq!(drops.get(), 1);
}

#[test]
fn payload_holding_every_weak_handle() {
    struct Holder {
        observers: Vec<Weak<Holder>>,
    }

    let holder = Shared::new_cyclic(|me| Holder {
        observers: (0..4).map(|_| me.clone()).collect(),
    });
    assert_eq!(Shared::weak_count(&holder), 4);
    assert!(holder.observers.iter().all(|weak| weak.use_count() == 1));

    drop(holder);
}

#[test]
fn weak_count_is_exact_inside_payload_drop() {
    struct SelfObserver {
        me: Weak<SelfObserver>,
        seen: Rc<Cell<usize>>,
    }

    impl Drop for SelfObserver {
        fn drop(&mut self) {
            self.seen.set(self.me.weak_count());
        }
    }

    let seen = Rc::new(Cell::new(usize::MAX));
    let observer = Shared::new_cyclic(|me| SelfObserver {
        me: me.clone(),
        seen: seen.clone(),
    });
    drop(observer);
    assert_eq!(seen.get(), 1);

    let observer = Shared::new_cyclic(|me| SelfObserver {
        me: me.clone(),
        seen: seen.clone(),
    });
    let outside = Shared::downgrade(&observer);
    drop(observer);
    assert_eq!(seen.get(), 2);
    assert_eq!(outside.weak_count(), 1);
    assert!(outside.expired());
}

#[test]
fn comparisons_treat_empty_as_smallest() {
    assert_eq!(Shared::new(100), Shared::new(100));
    assert_eq!(Shared::<i32>::empty(), Shared::default());
    assert!(Shared::new(100) != Shared::empty());
    assert!(Shared::new(1) < Shared::new(2));
    assert!(Shared::empty() < Shared::new(i32::MIN));
}

#[test]
fn ordered_map_with_an_empty_key() {
    let mut map = BTreeMap::new();
    map.insert(Shared::<i32>::empty(), "none");
    map.insert(Shared::new(1), "one");
    map.insert(Shared::new(2), "two");

    assert_eq!(map.get(&Shared::new(1)), Some(&"one"));
    assert_eq!(map.get(&Shared::empty()), Some(&"none"));
    assert_eq!(map.get(&Shared::new(3)), None);
    assert_eq!(map.keys().next().map(Shared::is_empty), Some(true));
}

#[test]
fn hash_matches_the_value() {
    fn hash_of<H: Hash>(value: &H) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    assert_eq!(hash_of(&Shared::new("abc")), hash_of(&"abc"));
}

#[test]
fn formatting() {
    assert_eq!(format!("{:?}", Shared::new(5)), "5");
    assert_eq!(format!("{}", Shared::new("text")), "text");
    assert_eq!(format!("{:?}", Shared::<i32>::empty()), "(empty)");
    assert_eq!(format!("{:?}", Weak::<i32>::new()), "(Weak)");
    assert_eq!(
        format!("{:p}", Shared::<i32>::empty()),
        format!("{:p}", std::ptr::null::<i32>())
    );
}

#[test]
fn error_messages() {
    assert_eq!(
        Error::EmptyDereference.to_string(),
        "dereferenced an empty shared handle"
    );
    assert_eq!(
        Error::AllocationFailure { size: 24, align: 8 }.to_string(),
        "failed to allocate a control block of 24 bytes aligned to 8"
    );
}
