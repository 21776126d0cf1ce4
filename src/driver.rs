//! Top-level entry points.
//!
//! Every entry point computes
//!
//! ```text
//! C = alpha * op(A) · op(B) + beta * C
//! ```
//!
//! with `op(A)` of shape `m × k`, `op(B)` of shape `k × n` and `C` of shape
//! `m × n`. Arguments are validated before `C` is touched. When `C` is
//! stored row-major the problem is solved as `Cᵀ = op(B)ᵀ · op(A)ᵀ` so the
//! kernels always write down columns; no data is moved to do this.
//!
//! Problems under the context's [`SmallThresholds`] read their operands in
//! place; everything else runs the blocked, packed algorithm.
//!
//! [`SmallThresholds`]: crate::SmallThresholds

use log::{debug, trace};

use crate::context::Context;
use crate::element::Element;
use crate::error::{shape_mismatch, Result};
use crate::scheduler::{self, Problem, Source};
use crate::unpacked;
use crate::view::{check_strides, locate, MatrixView, MatrixViewMut, Op, RawView, RawViewMut, Uplo};

impl<T: Element> Context<T> {
    /// Multiplies strided matrices stored in slices.
    ///
    /// `rsX` / `csX` are the row and column strides of the *stored* matrix
    /// `X`, before `op` is applied. Negative strides are allowed; see
    /// [`view`](crate::view) for how a slice maps to a view.
    ///
    /// # Errors
    ///
    /// - [`InvalidStride`](crate::GemmError::InvalidStride) for a zero
    ///   stride on a dimension longer than one, or overlapping rows/columns.
    /// - [`ShapeMismatch`](crate::GemmError::ShapeMismatch) when a slice is
    ///   too short for its view.
    /// - [`OutOfMemory`](crate::GemmError::OutOfMemory) when a packing
    ///   buffer cannot be allocated.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
        opa: Op,
        opb: Op,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        rsa: isize,
        csa: isize,
        b: &[T],
        rsb: isize,
        csb: isize,
        beta: T,
        c: &mut [T],
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        let (ar, ac) = opa.apply_dims(m, k);
        let (br, bc) = opb.apply_dims(k, n);
        let a_base = locate("A", a.len(), ar, ac, rsa, csa)?;
        let b_base = locate("B", b.len(), br, bc, rsb, csb)?;
        let c_base = locate("C", c.len(), m, n, rsc, csc)?;

        // SAFETY: `locate` checked every addressed element against the
        // slice lengths; `c` is borrowed mutably for the whole call.
        unsafe {
            let a = RawView::with_op(a.as_ptr().add(a_base), ar, ac, rsa, csa, opa);
            let b = RawView::with_op(b.as_ptr().add(b_base), br, bc, rsb, csb, opb);
            let c = RawViewMut {
                ptr: c.as_mut_ptr().add(c_base),
                rows: m,
                cols: n,
                rs: rsc,
                cs: csc,
            };
            self.execute(m, n, k, alpha, Source::View(a), Source::View(b), beta, c, None)
        }
    }

    /// Pointer-based variant of [`gemm`](Self::gemm).
    ///
    /// Strides are validated; memory is not.
    ///
    /// # Safety
    ///
    /// `a`, `b` and `c` must point to element `(0, 0)` of matrices that are
    /// valid for every element addressed by the given dimensions and
    /// strides. `C` must be valid for writes and must not overlap `A` or `B`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn gemm_raw(
        &self,
        opa: Op,
        opb: Op,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: *const T,
        rsa: isize,
        csa: isize,
        b: *const T,
        rsb: isize,
        csb: isize,
        beta: T,
        c: *mut T,
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        let (ar, ac) = opa.apply_dims(m, k);
        let (br, bc) = opb.apply_dims(k, n);
        check_strides("A", ar, ac, rsa, csa)?;
        check_strides("B", br, bc, rsb, csb)?;
        check_strides("C", m, n, rsc, csc)?;

        let a = RawView::with_op(a, ar, ac, rsa, csa, opa);
        let b = RawView::with_op(b, br, bc, rsb, csb, opb);
        let c = RawViewMut {
            ptr: c,
            rows: m,
            cols: n,
            rs: rsc,
            cs: csc,
        };
        self.execute(m, n, k, alpha, Source::View(a), Source::View(b), beta, c, None)
    }

    /// `C = alpha * A · B + beta * C` on views; transposes and conjugates
    /// come from the views themselves.
    pub fn matmul(
        &self,
        alpha: T,
        a: &MatrixView<'_, T>,
        b: &MatrixView<'_, T>,
        beta: T,
        c: &mut MatrixViewMut<'_, T>,
    ) -> Result<()> {
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        if b.rows() != k || c.rows() != m || c.cols() != n {
            return Err(shape_mismatch(format!(
                "cannot multiply {}x{} by {}x{} into {}x{}",
                m,
                k,
                b.rows(),
                n,
                c.rows(),
                c.cols()
            )));
        }
        let (a, b, c) = (a.raw(), b.raw(), c.raw());
        // SAFETY: views were validated on construction and `c` is borrowed
        // mutably for the whole call.
        unsafe { self.execute(m, n, k, alpha, Source::View(a), Source::View(b), beta, c, None) }
    }

    /// Shared tail of every entry point: degenerate shapes, storage-order
    /// canonicalisation, then the unpacked or the blocked algorithm.
    ///
    /// # Safety
    ///
    /// All views must describe valid memory; `c` must be writable and
    /// disjoint from the operands.
    #[allow(clippy::too_many_arguments)]
    pub(crate) unsafe fn execute(
        &self,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: Source<'_, T>,
        b: Source<'_, T>,
        beta: T,
        c: RawViewMut<T>,
        uplo: Option<Uplo>,
    ) -> Result<()> {
        trace!("{}gemm m={m} n={n} k={k}", T::NAME);

        if m == 0 || n == 0 {
            debug!("empty {m}x{n} output, nothing to do");
            return Ok(());
        }
        if k == 0 || alpha.is_zero() {
            debug!("k={k}, alpha zero={}: scaling C by beta only", alpha.is_zero());
            scheduler::scale_output(&c, beta, uplo);
            return Ok(());
        }

        let problem = match (a, b) {
            (Source::View(a), Source::View(b)) if c.cs.unsigned_abs() < c.rs.unsigned_abs() => {
                trace!("row-major C: computing the transposed product");
                Problem {
                    m: n,
                    n: m,
                    k,
                    alpha,
                    beta,
                    a: Source::View(b.transposed()),
                    b: Source::View(a.transposed()),
                    c: c.transposed(),
                    uplo: uplo.map(Uplo::flip),
                }
            }
            (a, b) => Problem {
                m,
                n,
                k,
                alpha,
                beta,
                a,
                b,
                c,
                uplo,
            },
        };

        if let (Source::View(a), Source::View(b)) = (&problem.a, &problem.b) {
            if self.small_thresholds().accepts(problem.m, problem.n, k) {
                unpacked::run(
                    self,
                    problem.m,
                    problem.n,
                    k,
                    problem.alpha,
                    a,
                    b,
                    problem.beta,
                    &problem.c,
                    problem.uplo,
                );
                return Ok(());
            }
        }

        scheduler::run(self, &problem)
    }
}

/// [`Context::gemm`] with the process-wide default context for `T`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Element>(
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    rsa: isize,
    csa: isize,
    b: &[T],
    rsb: isize,
    csb: isize,
    beta: T,
    c: &mut [T],
    rsc: isize,
    csc: isize,
) -> Result<()> {
    T::shared_context().gemm(opa, opb, m, n, k, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc)
}

/// [`Context::gemm_raw`] with the process-wide default context for `T`.
///
/// # Safety
///
/// See [`Context::gemm_raw`].
#[allow(clippy::too_many_arguments)]
pub unsafe fn gemm_raw<T: Element>(
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: *const T,
    rsa: isize,
    csa: isize,
    b: *const T,
    rsb: isize,
    csb: isize,
    beta: T,
    c: *mut T,
    rsc: isize,
    csc: isize,
) -> Result<()> {
    T::shared_context().gemm_raw(opa, opb, m, n, k, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc)
}

/// BLAS-style interface with separate transpose and conjugate flags.
#[allow(clippy::too_many_arguments)]
pub fn multiply<T: Element>(
    trans_a: bool,
    trans_b: bool,
    conj_a: bool,
    conj_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    rsa: isize,
    csa: isize,
    b: &[T],
    rsb: isize,
    csb: isize,
    beta: T,
    c: &mut [T],
    rsc: isize,
    csc: isize,
) -> Result<()> {
    gemm(
        Op::from_flags(trans_a, conj_a),
        Op::from_flags(trans_b, conj_b),
        m,
        n,
        k,
        alpha,
        a,
        rsa,
        csa,
        b,
        rsb,
        csb,
        beta,
        c,
        rsc,
        csc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GemmError;
    use crate::kernel::KernelChoice;

    #[test]
    fn test_hand_computed_4x4_with_2x2_tile() {
        let ctx = Context::<f64>::builder()
            .kernel(KernelChoice::PortableTile { mr: 2, nr: 2 })
            .build()
            .unwrap();
        let a: Vec<f64> = (1..=16).map(f64::from).collect();
        let b = a.clone();
        let mut c = vec![f64::NAN; 16];

        ctx.gemm(Op::NoTrans, Op::NoTrans, 4, 4, 4, 1.0, &a, 4, 1, &b, 4, 1, 0.0, &mut c, 4, 1)
            .unwrap();

        let expected = [
            90.0, 100.0, 110.0, 120.0, //
            202.0, 228.0, 254.0, 280.0, //
            314.0, 356.0, 398.0, 440.0, //
            426.0, 484.0, 542.0, 600.0,
        ];
        assert_eq!(c, expected);
    }

    #[test]
    fn test_thin_row_major_output_unpacked() {
        let ctx = Context::<f64>::builder()
            .kernel(KernelChoice::PortableTile { mr: 4, nr: 4 })
            .num_threads(1)
            .build()
            .unwrap();
        let (m, n, k) = (9, 2, 30);
        let a: Vec<f64> = (0..m * k).map(|v| (v % 5) as f64).collect();
        let b: Vec<f64> = (0..k * n).map(|v| (v % 3) as f64).collect();

        // A 9x2 output is thinner than one tile. Row-major C goes through
        // the transposed problem first.
        let mut c = vec![f64::NAN; m * n];
        ctx.gemm(Op::NoTrans, Op::NoTrans, m, n, k, 1.0, &a, k as isize, 1, &b, n as isize, 1, 0.0, &mut c, n as isize, 1)
            .unwrap();
        for i in 0..m {
            for j in 0..n {
                let dot: f64 = (0..k).map(|p| a[i * k + p] * b[p * n + j]).sum();
                assert_eq!(c[i * n + j], dot, "C({i}, {j})");
            }
        }
    }

    #[test]
    fn test_k_zero_scales_by_beta() {
        let a: [f32; 0] = [];
        let b: [f32; 0] = [];
        let mut c: Vec<f32> = (0..15).map(|v| v as f32).collect();
        gemm(Op::NoTrans, Op::NoTrans, 3, 5, 0, 1.0, &a, 1, 3, &b, 1, 1, 2.0, &mut c, 1, 3).unwrap();
        let expected: Vec<f32> = (0..15).map(|v| 2.0 * v as f32).collect();
        assert_eq!(c, expected);
    }

    #[test]
    fn test_empty_output_is_noop() {
        let a: [f64; 0] = [];
        let b = [1.0f64; 12];
        let mut c: [f64; 0] = [];
        gemm(Op::NoTrans, Op::NoTrans, 0, 3, 4, 1.0, &a, 1, 1, &b, 1, 4, 0.0, &mut c, 1, 1).unwrap();
    }

    #[test]
    fn test_inner_dimension_mismatch() {
        let a = [0.0f64; 6];
        let b = [0.0f64; 6];
        let mut c = [0.0f64; 4];
        let av = MatrixView::col_major(&a, 2, 3).unwrap();
        let bv = MatrixView::col_major(&b, 2, 3).unwrap();
        let mut cv = MatrixViewMut::col_major(&mut c, 2, 2).unwrap();
        let err = Context::new().matmul(1.0, &av, &bv, 0.0, &mut cv).unwrap_err();
        assert!(matches!(err, GemmError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_invalid_stride_leaves_c_untouched() {
        let a = [1.0f64; 16];
        let mut c = [7.0f64; 16];
        let err = gemm(Op::NoTrans, Op::NoTrans, 4, 4, 4, 1.0, &a, 1, 0, &a, 1, 4, 0.0, &mut c, 1, 4)
            .unwrap_err();
        assert!(matches!(err, GemmError::InvalidStride { operand: "A", .. }));
        assert!(c.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_short_slice_is_shape_mismatch() {
        let a = [1.0f32; 11];
        let mut c = [0.0f32; 9];
        let err = gemm(Op::NoTrans, Op::NoTrans, 3, 3, 4, 1.0, &a, 1, 3, &a, 1, 4, 0.0, &mut c, 1, 3)
            .unwrap_err();
        assert!(matches!(err, GemmError::ShapeMismatch { .. }));
    }
}
