//! Partial tiles.
//!
//! A tile at the bottom or right edge of C covers fewer than `mr × nr`
//! elements, and a tile straddling the diagonal of a triangular update must
//! leave part of its elements untouched. Both go through [`partial_tile`].
//! The packed panels are always full size (the packing engine zero-fills the
//! edge), so either strategy can read them without bounds checks.

use crate::element::Element;
use crate::kernel::{KernelInfo, MAX_TILE_ELEMS};
use crate::view::Uplo;

/// How partial tiles are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FringeStrategy {
    /// Run the full kernel into an `mr × nr` stack buffer, then copy the
    /// valid part back.
    #[default]
    Padded,
    /// Scalar loop over the valid part only.
    Scalar,
}

/// Shape and position of a partial tile.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tile {
    /// Valid rows, at most `mr`.
    pub rows: usize,
    /// Valid columns, at most `nr`.
    pub cols: usize,
    /// Global row of the tile's first element, used with `mask`.
    pub row0: usize,
    /// Global column of the tile's first element, used with `mask`.
    pub col0: usize,
    /// Only elements inside this triangle are written.
    pub mask: Option<Uplo>,
}

impl Tile {
    #[inline(always)]
    pub(crate) fn keeps(&self, i: usize, j: usize) -> bool {
        match self.mask {
            Some(uplo) => uplo.contains(self.row0 + i, self.col0 + j),
            None => true,
        }
    }
}

/// Computes `C = alpha * A·B + beta * C` on the valid part of one tile.
///
/// # Safety
///
/// `a` and `b` must point to full `mr × kc` and `kc × nr` packed panels of
/// `kernel`'s tile shape; every `c + i * rsc + j * csc` with
/// `i < tile.rows`, `j < tile.cols` must be valid for reads and writes.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn partial_tile<T: Element>(
    kernel: &KernelInfo<T>,
    strategy: FringeStrategy,
    tile: Tile,
    kc: usize,
    alpha: T,
    a: *const T,
    b: *const T,
    beta: T,
    c: *mut T,
    rsc: isize,
    csc: isize,
) {
    let (mr, nr) = (kernel.mr, kernel.nr);
    debug_assert!(tile.rows <= mr && tile.cols <= nr);
    let at = |i: usize, j: usize| c.offset(i as isize * rsc + j as isize * csc);

    match strategy {
        FringeStrategy::Padded => {
            let mut tmp = [T::zero(); MAX_TILE_ELEMS];
            let overwrite = beta.is_zero();
            if !overwrite {
                for j in 0..tile.cols {
                    for i in 0..tile.rows {
                        tmp[j * mr + i] = *at(i, j);
                    }
                }
            }

            (kernel.ukr)(kc, alpha, a, b, beta, tmp.as_mut_ptr(), 1, mr as isize);

            for j in 0..tile.cols {
                for i in 0..tile.rows {
                    if tile.keeps(i, j) {
                        *at(i, j) = tmp[j * mr + i];
                    }
                }
            }
        }
        FringeStrategy::Scalar => {
            let overwrite = beta.is_zero();
            for j in 0..tile.cols {
                for i in 0..tile.rows {
                    if !tile.keeps(i, j) {
                        continue;
                    }
                    let mut sum = T::zero();
                    for p in 0..kc {
                        sum = sum + *a.add(p * mr + i) * *b.add(p * nr + j);
                    }
                    let cij = at(i, j);
                    *cij = if overwrite {
                        alpha * sum
                    } else {
                        beta * *cij + alpha * sum
                    };
                }
            }
        }
    }
}
