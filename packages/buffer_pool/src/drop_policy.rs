/// Determines what happens when a [`BufferPool`][crate::BufferPool] is dropped while buffers
/// acquired from it have not been released back to it.
///
/// Outstanding buffers always remain valid after the pool is gone: each one owns its memory
/// and returns it to the system allocator when dropped. The policy only decides whether
/// this situation is acceptable.
///
/// # Examples
///
/// ```
/// use buffer_pool::{BufferPool, DropPolicy};
///
/// let pool = BufferPool::<u64>::builder()
///     .min_size(64)
///     .max_size(2048)
///     .drop_policy(DropPolicy::MustReleaseBuffers)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped while buffers are checked out, leaking them out of the pool.
    /// They keep owning their memory and are no longer reused. This is the default.
    #[default]
    MayLeakBuffers,

    /// Every buffer must be released back to the pool before the pool is dropped.
    /// The pool will panic if it is dropped while buffers are checked out.
    ///
    /// This is useful to verify that every acquired buffer is released back to the pool,
    /// which is the usage pattern the pool is designed for. Buffers that are dropped instead
    /// of released count as outstanding forever.
    MustReleaseBuffers,
}
