use core::{
    fmt::{self, Debug},
    ptr::NonNull,
};

use crate::{
    block::{self, ControlBlock},
    shared::Shared,
};

/// `Weak<T>` is a non-owning reference to the value held by [`Shared<T>`]s. It is used to prevent cyclic
/// references which cause memory to never be freed.
/// `Weak<T>` does not keep the value alive (which can be dropped), it only keeps the control block alive.
/// `Weak<T>` cannot access the value directly and must be promoted with [`Weak::lock`] or [`Weak::upgrade`].
///
/// One use case of a `Weak<T>` is a tree: parent nodes own their children through `Shared<T>`s, and children
/// point back at their parents through `Weak<T>`s.
///
/// A `Weak<T>` may also be empty, in which case it behaves like one whose value has been dropped.
///
/// Unlike [`Shared<T>`], `Weak<T>` does not implement [`Deref`](core::ops::Deref), so its functions cannot
/// clash with methods of `T` and are plain methods.
///
/// # Examples
/// ```
/// use shrc::Shared;
///
/// let shared = Shared::new(100);
/// let weak = Shared::downgrade(&shared);
/// assert_eq!(*weak.lock(), 100);
///
/// drop(shared);
/// assert!(weak.expired());
/// assert!(weak.upgrade().is_none());
/// ```
pub struct Weak<T> {
    block: Option<NonNull<ControlBlock<T>>>,
}

impl<T> Weak<T> {
    /// Creates an empty `Weak<T>`. It is expired and can never be promoted.
    /// ```
    /// use shrc::Weak;
    ///
    /// let weak = Weak::<i32>::new();
    /// assert!(weak.expired());
    /// assert_eq!(weak.use_count(), 0);
    /// ```
    #[inline]
    pub const fn new() -> Self {
        Weak { block: None }
    }

    /// Adopts one weak reference that has already been counted on `ptr`.
    ///
    /// # Safety
    /// The caller transfers ownership of exactly one weak reference on a live block.
    #[inline]
    pub(crate) unsafe fn from_block(ptr: NonNull<ControlBlock<T>>) -> Self {
        Weak { block: Some(ptr) }
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<ControlBlock<T>>> {
        self.block
    }

    #[inline]
    fn inner(&self) -> Option<&ControlBlock<T>> {
        // SAFETY: a non-empty weak handle keeps its block alive, even after the value is dropped.
        self.block.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Returns `true` if the handle is empty or the value it observed has been dropped.
    /// Only the strong count is consulted; the value itself is never touched.
    #[inline]
    pub fn expired(&self) -> bool {
        self.inner().map_or(true, |block| block.strong() == 0)
    }

    /// Attempts to promote this handle. Returns [`None`] if the handle is expired. Otherwise the strong count
    /// is incremented by exactly one and the new `Shared<T>` is returned.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100i32);
    /// let weak = Shared::downgrade(&shared);
    /// let new_shared = weak.upgrade().expect("Value was dropped");
    /// drop(weak);
    /// assert_eq!(*new_shared, 100i32);
    /// assert_eq!(Shared::use_count(&shared), 2);
    /// ```
    #[inline]
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let ptr = self.block?;
        // SAFETY: a non-empty weak handle keeps its block alive.
        let block = unsafe { ptr.as_ref() };
        if block.strong() == 0 {
            return None;
        }

        block.inc_strong();
        // SAFETY: the strong reference was counted just above.
        Some(unsafe { Shared::from_block(ptr) })
    }

    /// Promotes this handle, returning an empty `Shared<T>` if it is expired.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(5);
    /// let weak = Shared::downgrade(&shared);
    /// assert_eq!(Shared::use_count(&weak.lock()), 2);
    ///
    /// drop(shared);
    /// assert!(Shared::is_empty(&weak.lock()));
    /// ```
    #[inline]
    pub fn lock(&self) -> Shared<T> {
        self.upgrade().unwrap_or_default()
    }

    /// Returns the number of [`Shared<T>`]s keeping the observed value alive, or zero if the handle is empty
    /// or expired.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.inner().map_or(0, ControlBlock::strong)
    }

    /// Returns the number of `Weak<T>`s pointing at the same control block, this one included, or zero if the
    /// handle is empty. The count is exact at all times, including from inside the value's `Drop`.
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let weak1 = Shared::downgrade(&shared);
    /// let weak2 = weak1.clone();
    /// assert_eq!(weak2.weak_count(), 2);
    /// ```
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.inner().map_or(0, ControlBlock::weak)
    }

    /// Checks if the other `Weak<T>` points at the same control block as this one.
    /// Two empty handles are considered equal.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block == other.block
    }

    /// Makes this handle observe `shared`'s value.
    ///
    /// If `shared` already refers to this handle's control block, nothing happens. Otherwise the previous
    /// referent is released first, then the handle is replaced by
    /// [`Shared::downgrade(shared)`](Shared::downgrade).
    /// ```
    /// use shrc::{Shared, Weak};
    ///
    /// let shared = Shared::new(5);
    /// let mut weak = Weak::new();
    /// weak.assign_from_shared(&shared);
    /// assert!(!weak.expired());
    /// assert_eq!(weak.use_count(), 1);
    /// ```
    pub fn assign_from_shared(&mut self, shared: &Shared<T>) {
        if self.block != Shared::block(shared) {
            *self = Weak::new();
            *self = Weak::from(shared);
        }
    }
}

impl<T> Drop for Weak<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.block.take() {
            // SAFETY: this handle owned one weak reference on `ptr`.
            unsafe { block::release_weak(ptr) };
        }
    }
}

impl<T> Clone for Weak<T> {
    /// Clone a `Weak<T>` (increment the weak count).
    /// ```
    /// use shrc::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let weak1 = Shared::downgrade(&shared);
    /// let weak2 = weak1.clone();
    /// assert_eq!(Shared::weak_count(&shared), 2);
    /// ```
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.inner() {
            block.inc_weak();
        }

        Weak { block: self.block }
    }

    /// Assign `source` to this handle. Assigning a handle pointing at the same control block is a no-op.
    /// Otherwise the previous referent is released before `source`'s weak count is incremented.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        if !self.ptr_eq(source) {
            *self = Weak::new();
            *self = source.clone();
        }
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T> Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}

impl<T> From<&Shared<T>> for Weak<T> {
    /// Create a `Weak<T>` observing `shared`'s value, incrementing the weak count.
    /// An empty `Shared<T>` yields an empty `Weak<T>`.
    fn from(shared: &Shared<T>) -> Self {
        match Shared::block(shared) {
            Some(ptr) => {
                // SAFETY: a non-empty strong handle keeps its block alive.
                unsafe { ptr.as_ref() }.inc_weak();
                // SAFETY: the weak reference was counted just above.
                unsafe { Weak::from_block(ptr) }
            }
            None => Weak::new(),
        }
    }
}
