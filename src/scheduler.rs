//! The five-loop blocked algorithm.
//!
//! ```text
//! for jc in 0..n step nc                      columns of C and B
//!   for pc in 0..k step kc                    contraction; pack B[pc.., jc..] once
//!     for ic in 0..m step mc     (parallel)   rows of C and A; pack A[ic.., pc..]
//!       for jr in 0..nc step nr               one packed B panel
//!         for ir in 0..mc step mr             one packed A panel -> kernel
//! ```
//!
//! `beta` is applied by the first contraction block only; later blocks
//! accumulate with `beta = 1`. Worker threads own disjoint row blocks of C,
//! so no locking is needed on the output.

use std::cmp::min;

use log::trace;
use rayon::prelude::*;

use crate::context::Context;
use crate::element::Element;
use crate::error::Result;
use crate::fringe::{partial_tile, Tile};
use crate::pack::{pack_a, pack_b, packed_len, Block};
use crate::packed::PackedMatrix;
use crate::params::round_up;
use crate::pool::{self, PackBuffer};
use crate::view::{RawView, RawViewMut, Uplo};

/// Where an operand's packed panels come from.
pub(crate) enum Source<'p, T: Element> {
    /// Packed block by block from a view of `op(X)`.
    View(RawView<T>),
    /// Already packed by [`Context::pack_a`] / [`Context::pack_b`].
    Packed(&'p PackedMatrix<T>),
}

/// One `C = alpha * op(A)·op(B) + beta * C` problem with `m, n, k > 0`.
pub(crate) struct Problem<'p, T: Element> {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: T,
    pub beta: T,
    pub a: Source<'p, T>,
    pub b: Source<'p, T>,
    pub c: RawViewMut<T>,
    /// When set, only this triangle of the (square) output is written.
    pub uplo: Option<Uplo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    Inside,
    Outside,
    Straddle,
}

/// Position of the rectangle `rows × cols` at `(row0, col0)` relative to a
/// triangle.
pub(crate) fn classify(uplo: Uplo, row0: usize, rows: usize, col0: usize, cols: usize) -> Region {
    let (last_row, last_col) = (row0 + rows - 1, col0 + cols - 1);
    let (near, far) = match uplo {
        Uplo::Upper => ((last_row, col0), (row0, last_col)),
        Uplo::Lower => ((row0, last_col), (last_row, col0)),
    };
    if uplo.contains(near.0, near.1) {
        Region::Inside
    } else if !uplo.contains(far.0, far.1) {
        Region::Outside
    } else {
        Region::Straddle
    }
}

/// Runs the blocked algorithm for `problem` with the configuration of `ctx`.
pub(crate) fn run<T: Element>(ctx: &Context<T>, problem: &Problem<'_, T>) -> Result<()> {
    let threads = ctx.num_threads();
    ctx.install(|| blocked(ctx, problem, threads))
}

fn blocked<T: Element>(ctx: &Context<T>, p: &Problem<'_, T>, threads: usize) -> Result<()> {
    let (mr, nr) = (ctx.kernel().mr, ctx.kernel().nr);
    let blocking = ctx.blocking();
    let (kc, nc) = (blocking.kc, blocking.nc);
    let mc = if threads > 1 {
        min(blocking.mc, round_up(p.m.div_ceil(threads), mr))
    } else {
        blocking.mc
    };

    for jc in (0..p.n).step_by(nc) {
        let ncb = min(nc, p.n - jc);

        for (q, pc) in (0..p.k).step_by(kc).enumerate() {
            let kcb = min(kc, p.k - pc);
            let beta = if pc == 0 { p.beta } else { T::one() };
            trace!("block jc={jc} pc={pc}: {}x{ncb}x{kcb}, mc={mc}", p.m);

            let mut b_buf: Option<PackBuffer<T>> = None;
            let b_packed: &[T] = match &p.b {
                Source::View(view) => {
                    let buf = b_buf.insert(pool::acquire(packed_len(ncb, kcb, nr))?);
                    let block = Block {
                        start: jc,
                        len: ncb,
                        k0: pc,
                        kc: kcb,
                    };
                    // SAFETY: the driver checked that op(B) is k x n.
                    unsafe { pack_b(buf.as_mut_slice(), view, block, nr, None, threads > 1) };
                    buf.as_slice()
                }
                Source::Packed(packed) => packed.block(q, jc, ncb),
            };

            let row_block = |ic: usize| -> Result<()> {
                let mcb = min(mc, p.m - ic);
                if let Some(uplo) = p.uplo {
                    if classify(uplo, ic, mcb, jc, ncb) == Region::Outside {
                        return Ok(());
                    }
                }

                let mut a_buf: Option<PackBuffer<T>> = None;
                let a_packed: &[T] = match &p.a {
                    Source::View(view) => {
                        let buf = a_buf.insert(pool::acquire(packed_len(mcb, kcb, mr))?);
                        let block = Block {
                            start: ic,
                            len: mcb,
                            k0: pc,
                            kc: kcb,
                        };
                        // SAFETY: the driver checked that op(A) is m x k.
                        unsafe { pack_a(buf.as_mut_slice(), view, block, mr, None) };
                        buf.as_slice()
                    }
                    Source::Packed(packed) => packed.block(q, ic, mcb),
                };

                let tile_block = TileBlock {
                    ic,
                    mcb,
                    jc,
                    ncb,
                    kcb,
                };
                // SAFETY: the block lies inside C and no other worker owns
                // rows ic..ic + mcb.
                unsafe { macro_kernel(ctx, a_packed, b_packed, tile_block, p.alpha, beta, &p.c, p.uplo) };
                Ok(())
            };

            let row_starts: Vec<usize> = (0..p.m).step_by(mc).collect();
            if threads > 1 && row_starts.len() > 1 {
                row_starts.par_iter().try_for_each(|&ic| row_block(ic))?;
            } else {
                row_starts.iter().try_for_each(|&ic| row_block(ic))?;
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct TileBlock {
    ic: usize,
    mcb: usize,
    jc: usize,
    ncb: usize,
    kcb: usize,
}

/// Sweeps every `mr × nr` tile of one `mcb × ncb` block of C.
///
/// # Safety
///
/// `a` and `b` must be packed for this block with `ctx`'s tile shape, and
/// the block must lie inside `c`.
#[allow(clippy::too_many_arguments)]
unsafe fn macro_kernel<T: Element>(
    ctx: &Context<T>,
    a: &[T],
    b: &[T],
    blk: TileBlock,
    alpha: T,
    beta: T,
    c: &RawViewMut<T>,
    uplo: Option<Uplo>,
) {
    let kernel = ctx.kernel();
    let (mr, nr) = (kernel.mr, kernel.nr);

    for (jr, b_panel) in b.chunks_exact(blk.kcb * nr).enumerate() {
        let col0 = blk.jc + jr * nr;
        let cols = min(nr, blk.jc + blk.ncb - col0);

        for (ir, a_panel) in a.chunks_exact(mr * blk.kcb).enumerate() {
            let row0 = blk.ic + ir * mr;
            let rows = min(mr, blk.ic + blk.mcb - row0);

            let mask = match uplo.map(|u| (u, classify(u, row0, rows, col0, cols))) {
                None | Some((_, Region::Inside)) => None,
                Some((_, Region::Outside)) => continue,
                Some((u, Region::Straddle)) => Some(u),
            };

            let c_tile = c.at(row0, col0);
            if rows == mr && cols == nr && mask.is_none() {
                (kernel.ukr)(blk.kcb, alpha, a_panel.as_ptr(), b_panel.as_ptr(), beta, c_tile, c.rs, c.cs);
            } else {
                let tile = Tile {
                    rows,
                    cols,
                    row0,
                    col0,
                    mask,
                };
                partial_tile(
                    kernel,
                    ctx.fringe(),
                    tile,
                    blk.kcb,
                    alpha,
                    a_panel.as_ptr(),
                    b_panel.as_ptr(),
                    beta,
                    c_tile,
                    c.rs,
                    c.cs,
                );
            }
        }
    }
}

/// `C = beta * C` over the whole output or one triangle of it. `beta = 0`
/// writes zeros without reading, `beta = 1` touches nothing.
///
/// # Safety
///
/// `c` must describe valid, writable memory.
pub(crate) unsafe fn scale_output<T: Element>(c: &RawViewMut<T>, beta: T, uplo: Option<Uplo>) {
    if beta == T::one() {
        return;
    }
    let overwrite = beta.is_zero();
    for j in 0..c.cols {
        for i in 0..c.rows {
            if uplo.is_some_and(|u| !u.contains(i, j)) {
                continue;
            }
            let cij = c.at(i, j);
            *cij = if overwrite { T::zero() } else { beta * *cij };
        }
    }
}
