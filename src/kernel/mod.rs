//! Micro-tile kernels.
//!
//! A kernel computes one `mr × nr` tile of the output:
//!
//! ```text
//! C_tile = alpha * (A_panel · B_panel) + beta * C_tile
//! ```
//!
//! where `A_panel` is a packed `mr × kc` micro-panel stored as `kc` columns of
//! `mr` contiguous elements, and `B_panel` is a packed `kc × nr` micro-panel
//! stored as `kc` rows of `nr` contiguous elements. When `beta` is zero the
//! tile is written without being read.
//!
//! Kernels are plain `unsafe fn` pointers wrapped in a [`KernelInfo`]; the
//! choice between the portable kernel and a SIMD kernel is made once, when a
//! [`Context`](crate::Context) is built.

use crate::element::Element;
use crate::error::{unsupported, Result};

pub mod avx2;
pub mod generic;

/// Upper bound on `mr * nr` for any kernel. The fringe handler keeps a
/// stack buffer of this many elements.
pub const MAX_TILE_ELEMS: usize = 64;

/// Signature shared by every microkernel.
///
/// Arguments: `kc`, `alpha`, packed A micro-panel, packed B micro-panel,
/// `beta`, pointer to `C(0, 0)` of the tile, row stride and column stride of
/// `C` in elements.
///
/// # Safety
///
/// - `a` must be valid for `mr * kc` reads and `b` for `kc * nr` reads.
/// - Every `c + i * rsc + j * csc` with `i < mr`, `j < nr` must be valid for
///   reads and writes, and no two of them may alias.
pub type MicroKernelFn<T> =
    unsafe fn(usize, T, *const T, *const T, T, *mut T, isize, isize);

/// A selected microkernel together with its tile shape.
#[derive(Clone, Copy)]
pub struct KernelInfo<T> {
    /// Name used in logs, e.g. `avx2-fma-f32-8x8`.
    pub name: &'static str,
    /// Rows of the output tile.
    pub mr: usize,
    /// Columns of the output tile.
    pub nr: usize,
    /// The kernel itself.
    pub ukr: MicroKernelFn<T>,
}

impl<T> std::fmt::Debug for KernelInfo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelInfo")
            .field("name", &self.name)
            .field("mr", &self.mr)
            .field("nr", &self.nr)
            .finish()
    }
}

/// How a [`Context`](crate::Context) picks its kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelChoice {
    /// SIMD kernel when the CPU supports one, portable kernel otherwise.
    #[default]
    Auto,
    /// Portable kernel with the element type's default tile.
    Portable,
    /// Portable kernel with an explicit tile shape.
    PortableTile {
        /// Tile rows.
        mr: usize,
        /// Tile columns.
        nr: usize,
    },
    /// SIMD kernel only; fails when the CPU has none for the element type.
    Simd,
}

/// The SIMD kernel for `T` when the CPU has one, the portable kernel
/// otherwise.
pub fn auto<T: Element>() -> KernelInfo<T> {
    T::simd_kernel().unwrap_or_else(default_portable::<T>)
}

/// Resolves a [`KernelChoice`] for element type `T`.
pub fn select<T: Element>(choice: KernelChoice) -> Result<KernelInfo<T>> {
    match choice {
        KernelChoice::Auto => Ok(auto::<T>()),
        KernelChoice::Portable => Ok(default_portable::<T>()),
        KernelChoice::PortableTile { mr, nr } => generic::portable::<T>(mr, nr).ok_or_else(|| {
            unsupported(format!(
                "no portable {}x{} kernel for element type {}",
                mr,
                nr,
                T::NAME
            ))
        }),
        KernelChoice::Simd => T::simd_kernel().ok_or_else(|| {
            unsupported(format!(
                "no SIMD kernel for element type {} on this CPU",
                T::NAME
            ))
        }),
    }
}

/// Checks a user-supplied kernel descriptor.
pub(crate) fn validate<T>(info: &KernelInfo<T>) -> Result<()> {
    if info.mr == 0 || info.nr == 0 {
        return Err(unsupported(format!(
            "kernel {} has an empty {}x{} tile",
            info.name, info.mr, info.nr
        )));
    }
    if info.mr * info.nr > MAX_TILE_ELEMS {
        return Err(unsupported(format!(
            "kernel {} tile {}x{} exceeds {} elements",
            info.name, info.mr, info.nr, MAX_TILE_ELEMS
        )));
    }
    Ok(())
}

fn default_portable<T: Element>() -> KernelInfo<T> {
    let (mr, nr) = T::PORTABLE_TILE;
    match generic::portable::<T>(mr, nr) {
        Some(info) => info,
        None => generic::fallback::<T>(),
    }
}
