//! Rank-k updates that write one triangle of a square output.
//!
//! All of them reduce to [`Context::gemmt`]: a product restricted to the
//! `uplo` triangle (diagonal included) of `C`. Tiles entirely outside the
//! triangle are skipped; tiles crossing the diagonal go through the fringe
//! path and only write their in-triangle elements.
//!
//! | operation | update of the `uplo` triangle of `C` |
//! |---|---|
//! | `gemmt` | `alpha * op(A)·op(B) + beta * C` |
//! | `syrk`  | `alpha * op(A)·op(A)ᵀ + beta * C` |
//! | `herk`  | `alpha * op(A)·op(A)ᴴ + beta * C`, `alpha`, `beta` real |
//! | `syr2k` | `alpha * op(A)·op(B)ᵀ + alpha * op(B)·op(A)ᵀ + beta * C` |
//! | `her2k` | `alpha * op(A)·op(B)ᴴ + conj(alpha) * op(B)·op(A)ᴴ + beta * C`, `beta` real |
//!
//! `herk` and `her2k` leave the diagonal of `C` with zero imaginary parts,
//! except on the quick return (`alpha = 0` or `k = 0`, with `beta = 1`),
//! where `C` is not touched at all.
//! The two-pass updates validate every argument before the first pass; an
//! allocation failure in the second pass leaves the first pass applied.

use crate::context::Context;
use crate::element::Element;
use crate::error::Result;
use crate::scheduler::Source;
use crate::view::{locate, Op, RawView, RawViewMut, Uplo};

impl<T: Element> Context<T> {
    /// `C = alpha * op(A)·op(B) + beta * C` on the `uplo` triangle of the
    /// `n × n` matrix `C`; `op(A)` is `n × k`, `op(B)` is `k × n`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemmt(
        &self,
        uplo: Uplo,
        opa: Op,
        opb: Op,
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
        let (ar, ac) = opa.apply_dims(n, k);
        let (br, bc) = opb.apply_dims(k, n);
        let a_base = locate("A", a.len(), ar, ac, rsa, csa)?;
        let b_base = locate("B", b.len(), br, bc, rsb, csb)?;
        let c_base = locate("C", c.len(), n, n, rsc, csc)?;

        // SAFETY: `locate` checked every view against its slice.
        unsafe {
            let a = RawView::with_op(a.as_ptr().add(a_base), ar, ac, rsa, csa, opa);
            let b = RawView::with_op(b.as_ptr().add(b_base), br, bc, rsb, csb, opb);
            let c = RawViewMut {
                ptr: c.as_mut_ptr().add(c_base),
                rows: n,
                cols: n,
                rs: rsc,
                cs: csc,
            };
            self.execute(n, n, k, alpha, Source::View(a), Source::View(b), beta, c, Some(uplo))
        }
    }

    /// Symmetric rank-k update `C = alpha * op(A)·op(A)ᵀ + beta * C`.
    #[allow(clippy::too_many_arguments)]
    pub fn syrk(
        &self,
        uplo: Uplo,
        op: Op,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        rsa: isize,
        csa: isize,
        beta: T,
        c: &mut [T],
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        self.gemmt(uplo, op, op.transposed(), n, k, alpha, a, rsa, csa, a, rsa, csa, beta, c, rsc, csc)
    }

    /// Hermitian rank-k update `C = alpha * op(A)·op(A)ᴴ + beta * C`.
    #[allow(clippy::too_many_arguments)]
    pub fn herk(
        &self,
        uplo: Uplo,
        op: Op,
        n: usize,
        k: usize,
        alpha: T::Real,
        a: &[T],
        rsa: isize,
        csa: isize,
        beta: T::Real,
        c: &mut [T],
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        let opb = Op::from_flags(!op.is_trans(), !op.is_conj());
        let (alpha, beta) = (T::from_real(alpha), T::from_real(beta));
        self.gemmt(uplo, op, opb, n, k, alpha, a, rsa, csa, a, rsa, csa, beta, c, rsc, csc)?;
        if leaves_c_unchanged(k, alpha, beta) {
            return Ok(());
        }
        real_diagonal(c, n, rsc, csc)
    }

    /// Symmetric rank-2k update
    /// `C = alpha * op(A)·op(B)ᵀ + alpha * op(B)·op(A)ᵀ + beta * C`.
    #[allow(clippy::too_many_arguments)]
    pub fn syr2k(
        &self,
        uplo: Uplo,
        op: Op,
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
        let opt = op.transposed();
        self.check_pair(op, n, k, a, rsa, csa, b, rsb, csb)?;
        self.gemmt(uplo, op, opt, n, k, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc)?;
        self.gemmt(uplo, op, opt, n, k, alpha, b, rsb, csb, a, rsa, csa, T::one(), c, rsc, csc)
    }

    /// Hermitian rank-2k update
    /// `C = alpha * op(A)·op(B)ᴴ + conj(alpha) * op(B)·op(A)ᴴ + beta * C`.
    #[allow(clippy::too_many_arguments)]
    pub fn her2k(
        &self,
        uplo: Uplo,
        op: Op,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        rsa: isize,
        csa: isize,
        b: &[T],
        rsb: isize,
        csb: isize,
        beta: T::Real,
        c: &mut [T],
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        let oph = Op::from_flags(!op.is_trans(), !op.is_conj());
        let beta = T::from_real(beta);
        self.check_pair(op, n, k, a, rsa, csa, b, rsb, csb)?;
        self.gemmt(uplo, op, oph, n, k, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc)?;
        self.gemmt(uplo, op, oph, n, k, alpha.conj(), b, rsb, csb, a, rsa, csa, T::one(), c, rsc, csc)?;
        if leaves_c_unchanged(k, alpha, beta) {
            return Ok(());
        }
        real_diagonal(c, n, rsc, csc)
    }

    /// Validates both operands of a rank-2k update up front so the first
    /// pass never runs when the second would be rejected.
    #[allow(clippy::too_many_arguments)]
    fn check_pair(
        &self,
        op: Op,
        n: usize,
        k: usize,
        a: &[T],
        rsa: isize,
        csa: isize,
        b: &[T],
        rsb: isize,
        csb: isize,
    ) -> Result<()> {
        let (r, c) = op.apply_dims(n, k);
        locate("A", a.len(), r, c, rsa, csa)?;
        locate("B", b.len(), r, c, rsb, csb)?;
        Ok(())
    }
}

/// BLAS quick return: with nothing to add and `beta = 1`, `C` keeps its
/// diagonal as given, imaginary parts included.
fn leaves_c_unchanged<T: Element>(k: usize, alpha: T, beta: T) -> bool {
    (k == 0 || alpha.is_zero()) && beta == T::one()
}

/// Zeroes the imaginary parts of the diagonal of the `n × n` matrix in `c`.
fn real_diagonal<T: Element>(c: &mut [T], n: usize, rsc: isize, csc: isize) -> Result<()> {
    if !T::IS_COMPLEX {
        return Ok(());
    }
    let base = locate("C", c.len(), n, n, rsc, csc)?;
    for i in 0..n {
        let idx = (base as isize + i as isize * (rsc + csc)) as usize;
        c[idx] = T::from_real(c[idx].re());
    }
    Ok(())
}
