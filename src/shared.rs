use alloc::alloc::handle_alloc_error;
use core::{
    fmt::{self, Debug, Display, Pointer},
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    block::{self, ControlBlock},
    error::{Error, Result},
    weak::Weak,
};

/// `Shared<T>` is a single-threaded, heap-allocated smart pointer providing shared ownership of a value.
///
/// Every `Shared<T>` created from the same value points at one control block, which holds the value
/// together with a strong count (live `Shared<T>`s) and a weak count (live [`Weak<T>`]s).
/// Unlike [`Rc<T>`](alloc::rc::Rc), a `Shared<T>` may also be *empty*: it then points at nothing,
/// reports a [`use_count`](Shared::use_count) of zero and refuses to be dereferenced.
///
/// ## Breaking reference cycles with `Weak<T>`
/// A cycle between `Shared` pointers cannot be deallocated as the strong counts will never reach zero.
/// A [`Weak<T>`] observes the value without keeping it alive, and must be promoted back to a `Shared<T>`
/// (see [`Weak::lock`]) to access it. It keeps only the control block alive.
///
/// ## Clone behavior
/// Cloning a non-empty `Shared<T>` increments the strong count of the block; the value is not copied.
/// Cloning an empty handle yields another empty handle. [`Clone::clone_from`] is the assignment operation:
/// assigning a handle that already points at the same block (including itself) changes nothing, otherwise
/// the previous referent is first released exactly as if the handle had been dropped, then the new one is
/// shared.
///
/// ## Drop behavior
/// When a `Shared<T>` is dropped the strong count is decremented. When it reaches zero the value is
/// dropped in place. The control block is freed once no `Shared<T>` and no `Weak<T>` refers to it.
///
/// ## [`Deref`] behavior
/// `Shared<T>` automatically dereferences to `&T`. Dereferencing an empty handle panics; use
/// [`Shared::try_deref`] or [`Shared::get`] when the handle may be empty.
/// To prevent name clashes with methods of `T`, `Shared<T>`'s functions are associated.
///
/// `Shared<T>` implements neither [`Send`] nor [`Sync`]: the counts are not atomic.
///
/// ## Examples
/// ```
/// use shrc::Shared;
///
/// let shared = Shared::new(100);
/// let other = shared.clone();
/// assert_eq!(*other, 100);
/// assert_eq!(Shared::use_count(&shared), 2);
/// ```
pub struct Shared<T> {
    block: Option<NonNull<ControlBlock<T>>>,
    _owns: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Creates an empty `Shared<T>`. Nothing is allocated.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::<i32>::empty();
    /// assert!(Shared::is_empty(&shared));
    /// assert!(Shared::as_ptr(&shared).is_null());
    /// ```
    #[inline]
    pub const fn empty() -> Self {
        Shared {
            block: None,
            _owns: PhantomData,
        }
    }

    /// Adopts one strong reference that has already been counted on `ptr`.
    ///
    /// # Safety
    /// The caller transfers ownership of exactly one strong reference on a live block.
    #[inline]
    pub(crate) unsafe fn from_block(ptr: NonNull<ControlBlock<T>>) -> Self {
        Shared {
            block: Some(ptr),
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn block(this: &Self) -> Option<NonNull<ControlBlock<T>>> {
        this.block
    }

    #[inline]
    fn inner(this: &Self) -> Option<&ControlBlock<T>> {
        // SAFETY: a non-empty handle keeps its block alive.
        this.block.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Creates a new `Shared<T>` owning `value`, with a use count of one.
    ///
    /// Like [`Box::new`](alloc::boxed::Box::new), allocation failure is reported through
    /// [`handle_alloc_error`]. Use [`Shared::try_new`] to receive it as an [`Error`] instead.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(String::from("hello"));
    /// assert_eq!(*shared, "hello");
    /// assert_eq!(Shared::use_count(&shared), 1);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(shared) => shared,
            Err(_) => handle_alloc_error(ControlBlock::<T>::layout()),
        }
    }

    /// Creates a new `Shared<T>` owning `value`, or returns [`Error::AllocationFailure`] if the control
    /// block cannot be allocated. On failure `value` is dropped and no other handle is affected.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::try_new(5).unwrap();
    /// assert_eq!(*shared, 5);
    /// ```
    #[inline]
    pub fn try_new(value: T) -> Result<Self> {
        let ptr = ControlBlock::allocate(value)?;
        // SAFETY: `allocate` hands out the block with a strong count of one.
        Ok(unsafe { Shared::from_block(ptr) })
    }

    /// Creates a new `Shared<T>` whose value may hold a [`Weak<T>`] pointing at itself.
    ///
    /// `data_fn` receives a `Weak<T>` to the allocation that is about to be filled. Until `data_fn`
    /// returns, that weak handle is expired: [`Weak::lock`] yields an empty handle.
    /// ```
    /// use shrc::{Shared, Weak};
    ///
    /// struct Node {
    ///     me: Weak<Node>,
    /// }
    ///
    /// let node = Shared::new_cyclic(|me| Node { me: me.clone() });
    /// assert!(Shared::ptr_eq(&node, &node.me.lock()));
    /// ```
    pub fn new_cyclic<F>(data_fn: F) -> Self
    where
        F: FnOnce(&Weak<T>) -> T,
    {
        let ptr = match ControlBlock::<T>::allocate_uninit() {
            Ok(ptr) => ptr,
            Err(_) => handle_alloc_error(ControlBlock::<T>::layout()),
        };

        // SAFETY: `allocate_uninit` hands out the block with one weak reference.
        let weak = unsafe { Weak::from_block(ptr) };
        let value = data_fn(&weak);

        // SAFETY: the payload is still unconstructed and the strong count is zero.
        unsafe { ptr.as_ref().write_payload(value) };
        drop(weak);

        // SAFETY: `write_payload` counted this strong reference.
        unsafe { Shared::from_block(ptr) }
    }

    /// Returns the inner value if this is the only `Shared<T>` pointing at it.
    /// Otherwise, an [`Err`] is returned with the same `Shared<T>` that was passed in.
    /// This succeeds even if there are outstanding weak references, which become expired.
    /// An empty handle is always returned as an error.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(3);
    /// assert_eq!(Shared::try_unwrap(shared).ok(), Some(3));
    ///
    /// let shared = Shared::new(4);
    /// let _other = shared.clone();
    /// assert!(Shared::try_unwrap(shared).is_err());
    /// ```
    pub fn try_unwrap(this: Self) -> core::result::Result<T, Self> {
        let Some(ptr) = Shared::block(&this) else {
            return Err(this);
        };
        // SAFETY: a non-empty handle keeps its block alive.
        if unsafe { ptr.as_ref() }.strong() != 1 {
            return Err(this);
        }

        core::mem::forget(this);
        // SAFETY: the strong reference owned by `this` is the only one.
        Ok(unsafe { block::take_last_strong(ptr) })
    }

    /// Returns the inner value if this is the only `Shared<T>` pointing at it, otherwise drops this handle
    /// and returns [`None`]. If `into_inner` is called on every clone of a `Shared<T>`, exactly one of the
    /// calls returns the value, so it is never dropped in place.
    /// ```
    /// use shrc::Shared;
    ///
    /// let x = Shared::new(3);
    /// let y = Shared::clone(&x);
    ///
    /// assert_eq!(Shared::into_inner(x), None);
    /// assert_eq!(Shared::into_inner(y), Some(3));
    /// ```
    #[inline]
    pub fn into_inner(this: Self) -> Option<T> {
        Shared::try_unwrap(this).ok()
    }

    /// Returns the number of `Shared<T>`s pointing at this handle's value, or zero if the handle is empty.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let other = shared.clone();
    /// assert_eq!(Shared::use_count(&shared), 2);
    /// drop(other);
    /// assert_eq!(Shared::use_count(&shared), 1);
    /// assert_eq!(Shared::use_count(&Shared::<i32>::empty()), 0);
    /// ```
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        Self::inner(this).map_or(0, ControlBlock::strong)
    }

    /// Returns the number of [`Weak<T>`]s pointing at this handle's control block, or zero if the handle
    /// is empty. Strong handles do not count towards it.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let weak = Shared::downgrade(&shared);
    /// let weak2 = weak.clone();
    /// assert_eq!(Shared::weak_count(&shared), 2);
    /// ```
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        Self::inner(this).map_or(0, ControlBlock::weak)
    }

    /// Returns `true` if the handle points at nothing.
    #[inline]
    pub fn is_empty(this: &Self) -> bool {
        this.block.is_none()
    }

    /// Returns `true` if the handle points at a value.
    /// ```
    /// use shrc::Shared;
    ///
    /// assert!(Shared::is_some(&Shared::new(1)));
    /// assert!(!Shared::is_some(&Shared::<i32>::default()));
    /// ```
    #[inline]
    pub fn is_some(this: &Self) -> bool {
        this.block.is_some()
    }

    /// Checks if the other `Shared<T>` points at the same control block as this one.
    /// Two empty handles are considered equal.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared1 = Shared::new(100);
    /// let shared2 = shared1.clone();
    /// assert!(Shared::ptr_eq(&shared1, &shared2));
    /// assert!(!Shared::ptr_eq(&shared1, &Shared::new(100)));
    /// ```
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Gets a raw pointer to the value, or a null pointer if the handle is empty. Never fails.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// assert_eq!(unsafe { *Shared::as_ptr(&shared) }, 100);
    /// ```
    #[inline]
    pub fn as_ptr(this: &Self) -> *const T {
        Self::inner(this).map_or(ptr::null(), |block| block.payload().cast_const())
    }

    /// Gets a reference to the value, or [`None`] if the handle is empty.
    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        // SAFETY: the payload is alive while any strong handle exists.
        Self::inner(this).map(|block| unsafe { &*block.payload() })
    }

    /// Gets a reference to the value, or [`Error::EmptyDereference`] if the handle is empty.
    /// ```
    /// use shrc::{Error, Shared};
    ///
    /// assert_eq!(Shared::try_deref(&Shared::new(7)), Ok(&7));
    /// assert_eq!(
    ///     Shared::try_deref(&Shared::<i32>::empty()),
    ///     Err(Error::EmptyDereference)
    /// );
    /// ```
    #[inline]
    pub fn try_deref(this: &Self) -> Result<&T> {
        Self::get(this).ok_or(Error::EmptyDereference)
    }

    /// Gets a `&mut` reference to the value if no other `Shared<T>` or [`Weak<T>`] points at the same
    /// control block. Otherwise, or if the handle is empty, returns [`None`].
    /// ```
    /// use shrc::Shared;
    ///
    /// let mut shared = Shared::new(100);
    /// *Shared::get_mut(&mut shared).unwrap() = 300;
    /// assert_eq!(*shared, 300);
    ///
    /// let _weak = Shared::downgrade(&shared);
    /// assert!(Shared::get_mut(&mut shared).is_none());
    /// ```
    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let ptr = this.block?;
        // SAFETY: a non-empty handle keeps its block alive.
        let block = unsafe { ptr.as_ref() };
        if block.strong() == 1 && block.weak() == 0 {
            // SAFETY: `this` is the only handle of either kind, and it is borrowed mutably.
            Some(unsafe { &mut *block.payload() })
        } else {
            None
        }
    }

    /// Creates a [`Weak<T>`] observing this handle's value. Downgrading an empty handle yields an
    /// empty `Weak<T>`.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let weak = Shared::downgrade(&shared);
    /// assert!(!weak.expired());
    /// ```
    #[inline]
    pub fn downgrade(this: &Self) -> Weak<T> {
        Weak::from(this)
    }

    /// Releases this handle's referent and leaves the handle empty.
    /// ```
    /// use shrc::Shared;
    ///
    /// let mut shared = Shared::new(100);
    /// let weak = Shared::downgrade(&shared);
    /// Shared::reset(&mut shared);
    /// assert!(Shared::is_empty(&shared));
    /// assert!(weak.expired());
    /// ```
    #[inline]
    pub fn reset(this: &mut Self) {
        *this = Shared::empty();
    }

    /// Assigns the value observed by `weak` to this handle.
    ///
    /// If `weak` already refers to this handle's control block, nothing happens. Otherwise the previous
    /// referent is released first, then this handle becomes [`weak.lock()`](Weak::lock), which is empty if
    /// `weak` has expired by then.
    /// ```
    /// use shrc::Shared;
    ///
    /// let first = Shared::new(5);
    /// let weak = Shared::downgrade(&first);
    ///
    /// let mut second = Shared::new(6);
    /// Shared::assign_from_weak(&mut second, &weak);
    /// assert_eq!(*second, 5);
    /// assert_eq!(Shared::use_count(&second), 2);
    /// ```
    pub fn assign_from_weak(this: &mut Self, weak: &Weak<T>) {
        if this.block != weak.block() {
            Shared::reset(this);
            *this = weak.lock();
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    /// Get an immutable reference to the value.
    ///
    /// # Panics
    /// Panics with [`Error::EmptyDereference`] if the handle is empty.
    /// ```
    /// use shrc::Shared;
    /// use std::ops::Deref;
    ///
    /// let shared = Shared::new(100i32);
    /// assert_eq!(*shared, 100i32);
    /// assert_eq!(shared.deref(), &100i32);
    /// ```
    #[inline]
    fn deref(&self) -> &Self::Target {
        match Shared::try_deref(self) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.block.take() {
            // SAFETY: this handle owned one strong reference on `ptr`.
            unsafe { block::release_strong(ptr) };
        }
    }
}

impl<T> Clone for Shared<T> {
    /// Clone a `Shared<T>` (increment the strong count).
    /// It will panic if the strong count overflows.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let shared2 = shared.clone();
    /// assert_eq!(Shared::use_count(&shared2), 2);
    /// ```
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = Shared::inner(self) {
            block.inc_strong();
        }

        Shared {
            block: self.block,
            _owns: PhantomData,
        }
    }

    /// Assign `source` to this handle. Assigning a handle pointing at the same control block is a no-op.
    /// Otherwise the previous referent is released before `source`'s strong count is incremented.
    /// ```
    /// use shrc::Shared;
    ///
    /// let first = Shared::new(100);
    /// let mut second = first.clone();
    /// second.clone_from(&first);
    /// assert_eq!(Shared::use_count(&first), 2);
    /// ```
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        if !Shared::ptr_eq(self, source) {
            Shared::reset(self);
            *self = source.clone();
        }
    }
}

impl<T> Default for Shared<T> {
    /// Creates an empty `Shared<T>`.
    fn default() -> Self {
        Shared::empty()
    }
}

impl<T> AsRef<T> for Shared<T> {
    /// # Panics
    /// Panics with [`Error::EmptyDereference`] if the handle is empty, like [`Deref`].
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Display> Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(value) => Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: Debug> Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(value) => Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T> Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Pointer::fmt(&Shared::as_ptr(self), f)
    }
}

impl<T> From<T> for Shared<T> {
    /// Create a new `Shared<T>` from the provided value. This is equivalent to calling `Shared::new`.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::from(100);
    /// assert_eq!(*shared, 100);
    /// ```
    fn from(value: T) -> Self {
        Shared::new(value)
    }
}

impl<T> From<&Weak<T>> for Shared<T> {
    /// Promote a `Weak<T>` directly. This is equivalent to calling [`Weak::lock`]: an expired weak
    /// handle yields an empty `Shared<T>`.
    /// ```
    /// use shrc::{Shared, Weak};
    ///
    /// let weak = Shared::downgrade(&Shared::new(100));
    /// let shared: Shared<i32> = Shared::from(&weak);
    /// assert!(Shared::is_empty(&shared));
    /// ```
    fn from(weak: &Weak<T>) -> Self {
        weak.lock()
    }
}

impl<T: Hash> Hash for Shared<T> {
    /// Pass the value to the provided hasher. An empty handle hashes nothing.
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(value) = Shared::get(self) {
            value.hash(state);
        }
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    /// Equality by value, even if the values live in different allocations.
    /// Empty handles are equal to each other and to nothing else.
    /// ```
    /// use shrc::Shared;
    ///
    /// assert!(Shared::new(100) == Shared::new(100));
    /// assert!(Shared::new(100) != Shared::default());
    /// ```
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Shared::get(self) == Shared::get(other)
    }
}

impl<T: Eq> Eq for Shared<T> {}

impl<T: PartialOrd> PartialOrd for Shared<T> {
    /// Partial comparison by value. An empty handle orders before any value.
    /// ```
    /// use shrc::Shared;
    /// use std::cmp::Ordering;
    ///
    /// let shared1 = Shared::from(100);
    /// let shared2 = Shared::from(200);
    /// assert_eq!(Some(Ordering::Less), shared1.partial_cmp(&shared2));
    /// assert!(Shared::default() < shared1);
    /// ```
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Shared::get(self).partial_cmp(&Shared::get(other))
    }
}

impl<T: Ord> Ord for Shared<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        Shared::get(self).cmp(&Shared::get(other))
    }
}
