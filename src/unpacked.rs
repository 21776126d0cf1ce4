//! Small and skinny problems, computed without packing.
//!
//! When one output dimension is thinner than a tile, or the whole product
//! is only a few thousand multiply-adds, packing costs more than the
//! kernel saves. These problems read `op(A)` and `op(B)` straight from
//! their strided storage, one `mr × nr` tile of C at a time:
//!
//! ```text
//! for each mr x nr tile of C                  (parallel over tiles)
//!   for p in 0..k
//!     a[i] = op(A)(row0 + i, p)               one strided column of A
//!     ab[i, j] += a[i] * op(B)(p, col0 + j)   rank-1 update of the tile
//!   C[tile] = alpha * ab + beta * C[tile]
//! ```
//!
//! Edge tiles use the same loop with fewer rows or columns, and `beta = 0`
//! writes the tile without reading C.

use std::cmp::min;

use log::trace;
use rayon::prelude::*;

use crate::context::Context;
use crate::element::Element;
use crate::fringe::Tile;
use crate::kernel::MAX_TILE_ELEMS;
use crate::scheduler::{classify, Region};
use crate::view::{RawView, RawViewMut, Uplo};

/// Tiles handed to one rayon task at a time.
const TILES_PER_TASK: usize = 8;

/// Computes `C = alpha * op(A)·op(B) + beta * C` (restricted to `uplo`
/// when set) tile by tile from the strided views.
///
/// # Safety
///
/// `a` must be a valid `m × k` view, `b` a valid `k × n` view and `c` a
/// writable `m × n` view disjoint from both.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn run<T: Element>(
    ctx: &Context<T>,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &RawView<T>,
    b: &RawView<T>,
    beta: T,
    c: &RawViewMut<T>,
    uplo: Option<Uplo>,
) {
    let (mr, nr) = (ctx.kernel().mr, ctx.kernel().nr);
    let (tiles_m, tiles_n) = (m.div_ceil(mr), n.div_ceil(nr));
    let count = tiles_m * tiles_n;
    let threads = ctx.num_threads();
    trace!("unpacked {m}x{n}x{k}: {count} tiles of {mr}x{nr} on {threads} thread(s)");

    let tile_at = |t: usize| {
        let (row0, col0) = ((t % tiles_m) * mr, (t / tiles_m) * nr);
        let (rows, cols) = (min(mr, m - row0), min(nr, n - col0));
        let mask = match uplo.map(|u| (u, classify(u, row0, rows, col0, cols))) {
            None | Some((_, Region::Inside)) => None,
            Some((_, Region::Outside)) => return,
            Some((u, Region::Straddle)) => Some(u),
        };
        let tile = Tile {
            rows,
            cols,
            row0,
            col0,
            mask,
        };
        // SAFETY: the tile lies inside C and each index is visited by
        // exactly one task.
        unsafe { strided_tile(tile, mr, k, alpha, a, b, beta, c) };
    };

    if threads > 1 && count > TILES_PER_TASK {
        ctx.install(|| {
            (0..count)
                .into_par_iter()
                .with_min_len(TILES_PER_TASK)
                .for_each(tile_at)
        });
    } else {
        (0..count).for_each(tile_at);
    }
}

#[inline(always)]
unsafe fn load<T: Element>(v: &RawView<T>, i: usize, j: usize) -> T {
    let x = *v.at(i, j);
    if v.conj {
        x.conj()
    } else {
        x
    }
}

/// One tile of C from strided reads of `op(A)` and `op(B)`.
///
/// # Safety
///
/// Rows `tile.row0..tile.row0 + tile.rows` of `a`, columns
/// `tile.col0..tile.col0 + tile.cols` of `b` and the matching tile of `c`
/// must be in bounds; `tile.rows <= mr` and `mr * tile.cols` must not
/// exceed [`MAX_TILE_ELEMS`].
#[allow(clippy::too_many_arguments)]
unsafe fn strided_tile<T: Element>(
    tile: Tile,
    mr: usize,
    k: usize,
    alpha: T,
    a: &RawView<T>,
    b: &RawView<T>,
    beta: T,
    c: &RawViewMut<T>,
) {
    debug_assert!(tile.rows <= mr && mr * tile.cols <= MAX_TILE_ELEMS);
    let mut ab = [T::zero(); MAX_TILE_ELEMS];
    let mut a_col = [T::zero(); MAX_TILE_ELEMS];

    for p in 0..k {
        for i in 0..tile.rows {
            a_col[i] = load(a, tile.row0 + i, p);
        }
        for j in 0..tile.cols {
            let bpj = load(b, p, tile.col0 + j);
            let acc = &mut ab[j * mr..j * mr + tile.rows];
            for (dst, &ai) in acc.iter_mut().zip(&a_col[..tile.rows]) {
                *dst = *dst + ai * bpj;
            }
        }
    }

    let overwrite = beta.is_zero();
    for j in 0..tile.cols {
        for i in 0..tile.rows {
            if !tile.keeps(i, j) {
                continue;
            }
            let cij = c.at(tile.row0 + i, tile.col0 + j);
            let value = alpha * ab[j * mr + i];
            *cij = if overwrite { value } else { beta * *cij + value };
        }
    }
}
