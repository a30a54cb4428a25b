use core::ops::Deref;

/// Keeps a hot counter on its own cache line so producers and consumers
/// hammering neighbouring counters do not invalidate each other's lines.
///
/// 128 bytes on `x86_64`, `aarch64` and `powerpc64` where adjacent-line prefetch pulls line pairs,
/// 64 bytes elsewhere.
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64"
    ),
    repr(align(128))
)]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64"
    )),
    repr(align(64))
)]
#[derive(Default)]
pub(crate) struct CachePadded<T>(pub T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}
