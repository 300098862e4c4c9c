//! The control block shared by every `Shared<T>` and `Weak<T>` that point at the same value.
//!
//! A block carries two counters and the payload storage. The payload is alive while the strong
//! count is non-zero; the block itself is released once both counters are zero. Strong handles
//! do not hold an implicit weak unit, so every decrement of either counter re-checks both.
//! While the payload is being dropped the block is marked as such and is never released from
//! inside `T::drop`, even if that drop gives up the last weak handle.

use alloc::alloc::{alloc, dealloc, Layout};
use core::{
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use crate::error::{Error, Result};

/// Upper bound for both the strong and the weak count of a single block.
pub const MAX_REFCOUNT: usize = (isize::MAX) as usize;

const LOG_TARGET: &str = "shrc::block";

pub(crate) struct ControlBlock<T> {
    strong: Cell<usize>,
    weak: Cell<usize>,
    dropping: Cell<bool>,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> ControlBlock<T> {
    #[inline]
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Obtains storage for a block without initializing it.
    fn allocate_raw() -> Result<NonNull<Self>> {
        let layout = Self::layout();

        // SAFETY: the layout is never zero-sized, the counters alone take two words.
        let raw = unsafe { alloc(layout) }.cast::<Self>();
        match NonNull::new(raw) {
            Some(ptr) => Ok(ptr),
            None => {
                log::warn!(
                    target: LOG_TARGET,
                    "allocation of a {} byte control block failed",
                    layout.size()
                );
                Err(Error::AllocationFailure {
                    size: layout.size(),
                    align: layout.align(),
                })
            }
        }
    }

    /// Allocates a block holding `value`, with one strong reference and no weak ones.
    /// On failure `value` is dropped and nothing else is left behind.
    pub(crate) fn allocate(value: T) -> Result<NonNull<Self>> {
        let ptr = Self::allocate_raw()?;

        // SAFETY: `ptr` is freshly allocated with the layout of `Self`.
        unsafe {
            ptr.as_ptr().write(ControlBlock {
                strong: Cell::new(1),
                weak: Cell::new(0),
                dropping: Cell::new(false),
                payload: UnsafeCell::new(MaybeUninit::new(value)),
            });
        }

        log::trace!(target: LOG_TARGET, "allocated control block at {:p}", ptr);
        Ok(ptr)
    }

    /// Allocates a block whose payload is not constructed yet. The block starts with no strong
    /// reference and one weak reference, owned by the caller.
    pub(crate) fn allocate_uninit() -> Result<NonNull<Self>> {
        let ptr = Self::allocate_raw()?;

        // SAFETY: `ptr` is freshly allocated with the layout of `Self`.
        unsafe {
            ptr.as_ptr().write(ControlBlock {
                strong: Cell::new(0),
                weak: Cell::new(1),
                dropping: Cell::new(false),
                payload: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        log::trace!(target: LOG_TARGET, "allocated uninitialized control block at {:p}", ptr);
        Ok(ptr)
    }

    #[inline]
    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline]
    pub(crate) fn inc_strong(&self) {
        let prev = self.strong.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum strong reference count.");
        }
        self.strong.set(prev + 1);
    }

    #[inline]
    pub(crate) fn inc_weak(&self) {
        let prev = self.weak.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum weak reference count.");
        }
        self.weak.set(prev + 1);
    }

    #[inline]
    fn dec_strong(&self) -> usize {
        debug_assert!(self.strong.get() > 0);
        let now = self.strong.get() - 1;
        self.strong.set(now);
        now
    }

    #[inline]
    fn dec_weak(&self) -> usize {
        debug_assert!(self.weak.get() > 0);
        let now = self.weak.get() - 1;
        self.weak.set(now);
        now
    }

    /// Raw pointer to the payload slot. Only dereferenceable while the payload is alive.
    #[inline]
    pub(crate) fn payload(&self) -> *mut T {
        self.payload.get().cast()
    }

    /// Constructs the payload of a block created by [`ControlBlock::allocate_uninit`] and makes
    /// the caller its first strong owner.
    ///
    /// # Safety
    /// The payload must not be constructed yet and the strong count must be zero.
    pub(crate) unsafe fn write_payload(&self, value: T) {
        debug_assert_eq!(self.strong.get(), 0);
        unsafe { self.payload().write(value) };
        self.strong.set(1);
    }

    /// # Safety
    /// The payload must be alive and this must be the transition of the strong count to zero.
    unsafe fn destroy_payload(&self) {
        unsafe { ptr::drop_in_place(self.payload()) };
    }

    /// # Safety
    /// The payload must already be destroyed (or never constructed) and no handle may still
    /// reference the block.
    unsafe fn release_block(ptr: NonNull<Self>) {
        unsafe { dealloc(ptr.as_ptr().cast(), Self::layout()) };
        log::trace!(target: LOG_TARGET, "released control block at {:p}", ptr);
    }
}

/// Gives up one strong reference. Destroys the payload when it was the last one, then
/// releases the block if no weak reference remains either.
///
/// # Safety
/// `ptr` must point to a live block on which the caller owns one strong reference.
pub(crate) unsafe fn release_strong<T>(ptr: NonNull<ControlBlock<T>>) {
    let block = unsafe { ptr.as_ref() };
    if block.dec_strong() != 0 {
        return;
    }

    // `T::drop` may release weak handles to this block; they must not free it underneath us.
    block.dropping.set(true);
    unsafe { block.destroy_payload() };
    block.dropping.set(false);
    log::trace!(target: LOG_TARGET, "destroyed payload of control block at {:p}", ptr);

    if block.weak() == 0 {
        unsafe { ControlBlock::release_block(ptr) };
    }
}

/// Gives up one weak reference and releases the block if it was the last reference of
/// either kind.
///
/// # Safety
/// `ptr` must point to a live block on which the caller owns one weak reference.
pub(crate) unsafe fn release_weak<T>(ptr: NonNull<ControlBlock<T>>) {
    let block = unsafe { ptr.as_ref() };
    if block.dec_weak() == 0 && block.strong() == 0 && !block.dropping.get() {
        unsafe { ControlBlock::release_block(ptr) };
    }
}

/// Gives up the only strong reference and moves the payload out instead of dropping it.
///
/// # Safety
/// `ptr` must point to a live block whose strong count is exactly one, owned by the caller.
pub(crate) unsafe fn take_last_strong<T>(ptr: NonNull<ControlBlock<T>>) -> T {
    let block = unsafe { ptr.as_ref() };
    debug_assert_eq!(block.strong(), 1);
    block.dec_strong();

    let value = unsafe { ptr::read(block.payload()) };
    log::trace!(target: LOG_TARGET, "moved payload out of control block at {:p}", ptr);

    if block.weak() == 0 {
        unsafe { ControlBlock::release_block(ptr) };
    }
    value
}
