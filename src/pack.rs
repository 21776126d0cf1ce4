//! Operand packing.
//!
//! Packing copies a block of an operand into a contiguous buffer of
//! micro-panels in the exact order the microkernel reads them:
//!
//! ```text
//! A block (mc x kc) -> ceil(mc/mr) panels, panel[p * mr + i] = op(A)(i0 + i, p0 + p)
//! B block (kc x nc) -> ceil(nc/nr) panels, panel[p * nr + j] = op(B)(p0 + p, j0 + j)
//! ```
//!
//! Rows (or columns) past the block edge are filled with zeros so partial
//! tiles can run the full kernel. Conjugation and the optional scale are
//! applied while copying. B is packed with the same routine as A by
//! transposing its view first.

use rayon::prelude::*;

use crate::element::Element;
use crate::view::RawView;

/// Origin and extent of a block inside an operand view.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    /// First row (A) or column (B) of the block.
    pub start: usize,
    /// Rows (A) or columns (B) in the block.
    pub len: usize,
    /// First index along the contraction dimension.
    pub k0: usize,
    /// Depth along the contraction dimension.
    pub kc: usize,
}

/// Number of elements needed to pack a block of `len` rows, depth `kc`, in
/// panels of `edge` rows.
#[inline(always)]
pub(crate) fn packed_len(len: usize, kc: usize, edge: usize) -> usize {
    len.div_ceil(edge) * edge * kc
}

/// Packs one panel of up to `edge` rows.
///
/// # Safety
///
/// Rows `start..start + valid` and columns `k0..k0 + kc` must lie inside `src`.
#[inline(always)]
#[allow(clippy::too_many_arguments)]
unsafe fn pack_panel<T: Element>(
    panel: &mut [T],
    src: &RawView<T>,
    start: usize,
    valid: usize,
    k0: usize,
    kc: usize,
    edge: usize,
    scale: Option<T>,
) {
    for p in 0..kc {
        let dst = &mut panel[p * edge..(p + 1) * edge];
        for (i, slot) in dst.iter_mut().enumerate().take(valid) {
            let mut v = *src.at(start + i, k0 + p);
            if src.conj {
                v = v.conj();
            }
            if let Some(s) = scale {
                v = s * v;
            }
            *slot = v;
        }
        for slot in &mut dst[valid..] {
            *slot = T::zero();
        }
    }
}

/// Packs `block` of `src` into `dst` as `edge`-row panels, splitting the
/// panels across the current rayon pool when `parallel` is set. Every panel
/// is written by exactly one worker.
///
/// # Safety
///
/// `block` must lie inside `src`, and `dst` must hold at least
/// [`packed_len`]`(block.len, block.kc, edge)` elements.
pub(crate) unsafe fn pack_block<T: Element>(
    dst: &mut [T],
    src: &RawView<T>,
    block: Block,
    edge: usize,
    scale: Option<T>,
    parallel: bool,
) {
    let panel_len = edge * block.kc;
    if panel_len == 0 {
        return;
    }
    let dst = &mut dst[..packed_len(block.len, block.kc, edge)];

    let fill = |(ip, panel): (usize, &mut [T])| {
        let start = block.start + ip * edge;
        let valid = edge.min(block.len - ip * edge);
        // SAFETY: the caller guarantees the block is inside `src`.
        unsafe { pack_panel(panel, src, start, valid, block.k0, block.kc, edge, scale) };
    };

    if parallel {
        dst.par_chunks_mut(panel_len).enumerate().for_each(fill);
    } else {
        dst.chunks_mut(panel_len).enumerate().for_each(fill);
    }
}

/// Packs rows `block.start..` of `op(A)` into `mr`-row panels.
///
/// # Safety
///
/// See [`pack_block`].
pub(crate) unsafe fn pack_a<T: Element>(
    dst: &mut [T],
    a: &RawView<T>,
    block: Block,
    mr: usize,
    scale: Option<T>,
) {
    pack_block(dst, a, block, mr, scale, false);
}

/// Packs columns `block.start..` of `op(B)` into `nr`-column panels.
///
/// # Safety
///
/// See [`pack_block`].
pub(crate) unsafe fn pack_b<T: Element>(
    dst: &mut [T],
    b: &RawView<T>,
    block: Block,
    nr: usize,
    scale: Option<T>,
    parallel: bool,
) {
    pack_block(dst, &b.transposed(), block, nr, scale, parallel);
}
