//! Portable microkernel.
//!
//! Written over fixed-size accumulator arrays so the compiler can keep the
//! tile in registers and vectorize the rank-1 updates. One instantiation per
//! supported tile shape is exposed through [`portable`].

use crate::element::Element;
use crate::kernel::KernelInfo;

/// Computes `C = alpha * A·B + beta * C` for one `MR × NR` tile.
///
/// The contraction runs sequentially over `kc` in packed order; the result
/// for a given packing is therefore deterministic.
///
/// # Safety
///
/// See [`MicroKernelFn`](crate::kernel::MicroKernelFn).
#[allow(clippy::too_many_arguments, clippy::needless_range_loop)]
pub unsafe fn kernel<T: Element, const MR: usize, const NR: usize>(
    kc: usize,
    alpha: T,
    a: *const T,
    b: *const T,
    beta: T,
    c: *mut T,
    rsc: isize,
    csc: isize,
) {
    let mut ab = [[T::zero(); NR]; MR];

    let mut a = a;
    let mut b = b;
    for _ in 0..kc {
        let a_col: [T; MR] = std::ptr::read_unaligned(a.cast::<[T; MR]>());
        let b_row: [T; NR] = std::ptr::read_unaligned(b.cast::<[T; NR]>());
        for i in 0..MR {
            for j in 0..NR {
                ab[i][j] = ab[i][j] + a_col[i] * b_row[j];
            }
        }
        a = a.add(MR);
        b = b.add(NR);
    }

    if beta.is_zero() {
        for j in 0..NR {
            for i in 0..MR {
                let cij = c.offset(i as isize * rsc + j as isize * csc);
                *cij = alpha * ab[i][j];
            }
        }
    } else {
        for j in 0..NR {
            for i in 0..MR {
                let cij = c.offset(i as isize * rsc + j as isize * csc);
                *cij = beta * *cij + alpha * ab[i][j];
            }
        }
    }
}

/// Looks up the portable kernel for an `mr × nr` tile.
pub fn portable<T: Element>(mr: usize, nr: usize) -> Option<KernelInfo<T>> {
    macro_rules! tiles {
        ($(($m:literal, $n:literal)),* $(,)?) => {
            match (mr, nr) {
                $(($m, $n) => Some(KernelInfo {
                    name: concat!("portable-", $m, "x", $n),
                    mr: $m,
                    nr: $n,
                    ukr: kernel::<T, $m, $n>,
                }),)*
                _ => None,
            }
        };
    }

    tiles!(
        (1, 1),
        (2, 2),
        (2, 4),
        (4, 2),
        (4, 4),
        (4, 8),
        (8, 4),
        (6, 8),
        (8, 6),
        (8, 8),
        (16, 4),
        (4, 16),
    )
}

/// The 1×1 kernel, always available.
pub(crate) fn fallback<T: Element>() -> KernelInfo<T> {
    KernelInfo {
        name: "portable-1x1",
        mr: 1,
        nr: 1,
        ukr: kernel::<T, 1, 1>,
    }
}
