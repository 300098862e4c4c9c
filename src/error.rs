use thiserror::Error;

/// Errors reported by fallible handle operations.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The global allocator could not provide storage for a control block.
    /// No handle was created and no existing handle was touched.
    #[error("failed to allocate a control block of {size} bytes aligned to {align}")]
    AllocationFailure {
        /// Size of the requested control block, in bytes.
        size: usize,

        /// Alignment of the requested control block, in bytes.
        align: usize,
    },

    /// An empty `Shared<T>` was dereferenced.
    #[error("dereferenced an empty shared handle")]
    EmptyDereference,
}

/// A specialized `Result` type for handle operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = core::result::Result<T, Error>;
