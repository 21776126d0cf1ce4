//! Aligned packing buffers and the process-wide reuse pool.
//!
//! Packing buffers are 64-byte aligned and rounded up to a power-of-two size
//! class. When a [`PackBuffer`] is dropped its memory goes back to the pool
//! under the key `(worker slot, size class)`, so a worker that packs the same
//! block shape over and over keeps reusing the same memory.
//!
//! The worker slot is the rayon thread index, or none outside any rayon
//! pool. Indices are reused by every pool, so contexts that come and go
//! share the same keys and the pool holds at most
//! `(largest pool size + 1) × size classes × 4` buffers.
//!
//! Allocation failure is reported as [`GemmError::OutOfMemory`]
//! instead of aborting the process.
//!
//! [`GemmError::OutOfMemory`]: crate::GemmError::OutOfMemory

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::{debug, trace};

use crate::element::Element;
use crate::error::{out_of_memory, Result};

/// Alignment of every packing buffer, in bytes.
pub const ALIGNMENT: usize = 64;

/// Smallest size class, in bytes.
const MIN_CLASS: usize = 4096;

/// Buffers kept per `(worker slot, size class)` key; extra buffers are freed.
const MAX_CACHED_PER_KEY: usize = 4;

/// An owned, zero-initialised, 64-byte aligned block of bytes.
pub(crate) struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: `AlignedBuf` uniquely owns its allocation.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    pub(crate) fn zeroed(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), ALIGNMENT)
            .map_err(|_| out_of_memory(size, ALIGNMENT))?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| out_of_memory(size, ALIGNMENT))?;
        Ok(AlignedBuf { ptr, layout })
    }

    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// `(rayon thread index, size class)`.
type PoolKey = (Option<usize>, usize);

type PoolMap = HashMap<PoolKey, Vec<AlignedBuf>>;

fn pool() -> MutexGuard<'static, PoolMap> {
    static POOL: OnceLock<Mutex<PoolMap>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn size_class(bytes: usize) -> Result<usize> {
    bytes
        .max(MIN_CLASS)
        .checked_next_power_of_two()
        .ok_or_else(|| out_of_memory(bytes, ALIGNMENT))
}

/// A typed view of a pooled buffer holding `len` elements of `T`.
///
/// The contents of a reused buffer are whatever the previous user left;
/// packing routines overwrite every slot they hand to a kernel.
pub struct PackBuffer<T: Element> {
    buf: Option<AlignedBuf>,
    key: PoolKey,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> PackBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.buf {
            // SAFETY: the allocation holds at least `len` elements, is aligned
            // for `T`, and was zero-initialised; every bit pattern is a valid
            // `Element`.
            Some(buf) => unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<T>(), self.len) },
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.buf {
            // SAFETY: as in `as_slice`; `&mut self` gives exclusive access.
            Some(buf) => unsafe {
                std::slice::from_raw_parts_mut(buf.as_ptr().cast::<T>(), self.len)
            },
            None => &mut [],
        }
    }
}

impl<T: Element> Drop for PackBuffer<T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let mut map = pool();
            let slot = map.entry(self.key).or_default();
            if slot.len() < MAX_CACHED_PER_KEY {
                slot.push(buf);
            }
        }
    }
}

/// Takes a buffer of at least `len` elements cached for the calling worker
/// slot, allocating a new one when none is cached.
pub(crate) fn acquire<T: Element>(len: usize) -> Result<PackBuffer<T>> {
    let elem = std::mem::size_of::<T>();
    let bytes = len
        .checked_mul(elem)
        .ok_or_else(|| out_of_memory(usize::MAX, ALIGNMENT))?;
    let class = size_class(bytes)?;
    let key = (rayon::current_thread_index(), class);

    let cached = pool().get_mut(&key).and_then(Vec::pop);
    let buf = match cached {
        Some(buf) => buf,
        None => {
            trace!("allocating {class} byte packing buffer for {len} {} elements", T::NAME);
            AlignedBuf::zeroed(class)?
        }
    };

    Ok(PackBuffer {
        buf: Some(buf),
        key,
        len,
        _marker: PhantomData,
    })
}

/// Snapshot of the buffers currently cached by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Number of cached buffers.
    pub buffers: usize,
    /// Total bytes held by cached buffers.
    pub bytes: usize,
}

/// Reports how many buffers the pool currently caches.
pub fn stats() -> PoolStats {
    pool()
        .values()
        .flatten()
        .fold(PoolStats::default(), |acc, buf| PoolStats {
            buffers: acc.buffers + 1,
            bytes: acc.bytes + buf.size(),
        })
}

/// Frees every cached buffer. Buffers currently in use are unaffected and
/// return to the (now empty) pool when dropped.
pub fn reset() {
    let drained: Vec<_> = pool().drain().collect();
    let freed: usize = drained.iter().map(|(_, v)| v.len()).sum();
    debug!("packing buffer pool reset, {freed} buffers freed");
}
