//! Strided matrix views and operand modifiers.
//!
//! A view describes a `rows × cols` matrix inside a slice through a row
//! stride and a column stride, both in elements and both allowed to be
//! negative. The slice must cover exactly the addressed elements' span:
//! when a stride is negative, element `(0, 0)` is not at index 0 but at the
//! offset that makes the lowest addressed element land on index 0.
//!
//! ```text
//! column-major 3x2, rs = 1, cs = 3     row-major 3x2, rs = 2, cs = 1
//! [a00 a10 a20 a01 a11 a21]            [a00 a01 a10 a11 a20 a21]
//! ```

use crate::element::Element;
use crate::error::{invalid_stride, shape_mismatch, Result};

/// Transpose / conjugate selector for an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Op {
    /// `A`
    #[default]
    NoTrans,
    /// `Aᵀ`
    Trans,
    /// `conj(A)`
    ConjNoTrans,
    /// `Aᴴ`
    ConjTrans,
}

impl Op {
    /// Builds an `Op` from separate transpose and conjugate flags.
    pub fn from_flags(trans: bool, conj: bool) -> Op {
        match (trans, conj) {
            (false, false) => Op::NoTrans,
            (true, false) => Op::Trans,
            (false, true) => Op::ConjNoTrans,
            (true, true) => Op::ConjTrans,
        }
    }

    #[inline(always)]
    pub fn is_trans(self) -> bool {
        matches!(self, Op::Trans | Op::ConjTrans)
    }

    #[inline(always)]
    pub fn is_conj(self) -> bool {
        matches!(self, Op::ConjNoTrans | Op::ConjTrans)
    }

    /// The same conjugation with the transpose flag toggled.
    pub fn transposed(self) -> Op {
        Op::from_flags(!self.is_trans(), self.is_conj())
    }

    /// Dimensions of `op(X)` for a stored `rows × cols` matrix `X`.
    #[inline(always)]
    pub fn apply_dims(self, rows: usize, cols: usize) -> (usize, usize) {
        if self.is_trans() {
            (cols, rows)
        } else {
            (rows, cols)
        }
    }
}

/// Which triangle of a square output is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uplo {
    /// Elements with `i <= j`.
    Upper,
    /// Elements with `i >= j`.
    Lower,
}

impl Uplo {
    /// The opposite triangle; the upper triangle of `C` is the lower
    /// triangle of `Cᵀ`.
    pub fn flip(self) -> Uplo {
        match self {
            Uplo::Upper => Uplo::Lower,
            Uplo::Lower => Uplo::Upper,
        }
    }

    /// Whether `(i, j)` lies in this triangle (diagonal included).
    #[inline(always)]
    pub fn contains(self, i: usize, j: usize) -> bool {
        match self {
            Uplo::Upper => i <= j,
            Uplo::Lower => i >= j,
        }
    }
}

/// Checks that a `rows × cols` layout with strides `(rs, cs)` addresses
/// every element exactly once.
pub(crate) fn check_strides(
    operand: &'static str,
    rows: usize,
    cols: usize,
    rs: isize,
    cs: isize,
) -> Result<()> {
    if rows > 1 && rs == 0 {
        return Err(invalid_stride(operand, rs, rows, "zero row stride"));
    }
    if cols > 1 && cs == 0 {
        return Err(invalid_stride(operand, cs, cols, "zero column stride"));
    }
    if rows > 1 && cols > 1 {
        let (ars, acs) = (rs.unsigned_abs(), cs.unsigned_abs());
        if acs >= ars {
            if acs < rows.saturating_mul(ars) {
                return Err(invalid_stride(
                    operand,
                    cs,
                    rows,
                    "leading dimension smaller than minor extent",
                ));
            }
        } else if ars < cols.saturating_mul(acs) {
            return Err(invalid_stride(
                operand,
                rs,
                cols,
                "leading dimension smaller than minor extent",
            ));
        }
    }
    Ok(())
}

/// Offset of element `(0, 0)` and number of slice elements spanned by a
/// `rows × cols` layout.
pub(crate) fn span(rows: usize, cols: usize, rs: isize, cs: isize) -> Result<(usize, usize)> {
    if rows == 0 || cols == 0 {
        return Ok((0, 0));
    }

    let extent = |n: usize, s: isize| -> Option<isize> {
        isize::try_from(n - 1).ok()?.checked_mul(s)
    };
    let bounds = || -> Option<(isize, isize)> {
        let (r, c) = (extent(rows, rs)?, extent(cols, cs)?);
        let lo = r.min(0).checked_add(c.min(0))?;
        let hi = r.max(0).checked_add(c.max(0))?;
        Some((lo, hi.checked_sub(lo)?))
    };
    match bounds() {
        Some((lo, d)) => Ok((lo.unsigned_abs(), d.unsigned_abs() + 1)),
        None => Err(shape_mismatch(format!(
            "{rows}x{cols} view with strides ({rs}, {cs}) overflows the address space"
        ))),
    }
}

/// Checks strides and slice length and returns the offset of `(0, 0)`.
pub(crate) fn locate(
    operand: &'static str,
    len: usize,
    rows: usize,
    cols: usize,
    rs: isize,
    cs: isize,
) -> Result<usize> {
    check_strides(operand, rows, cols, rs, cs)?;
    let (base, needed) = span(rows, cols, rs, cs)?;
    if len < needed {
        return Err(shape_mismatch(format!(
            "operand {operand}: {rows}x{cols} view with strides ({rs}, {cs}) needs {needed} elements, slice has {len}"
        )));
    }
    Ok(base)
}

/// A read-only strided matrix view with a pending transpose / conjugate.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a, T> {
    data: &'a [T],
    base: usize,
    rows: usize,
    cols: usize,
    rs: isize,
    cs: isize,
    op: Op,
}

impl<'a, T: Element> MatrixView<'a, T> {
    /// A `rows × cols` view with explicit strides.
    pub fn from_slice(data: &'a [T], rows: usize, cols: usize, rs: isize, cs: isize) -> Result<Self> {
        let base = locate("input", data.len(), rows, cols, rs, cs)?;
        Ok(MatrixView {
            data,
            base,
            rows,
            cols,
            rs,
            cs,
            op: Op::NoTrans,
        })
    }

    /// A dense row-major view.
    pub fn row_major(data: &'a [T], rows: usize, cols: usize) -> Result<Self> {
        Self::from_slice(data, rows, cols, cols.max(1) as isize, 1)
    }

    /// A dense column-major view.
    pub fn col_major(data: &'a [T], rows: usize, cols: usize) -> Result<Self> {
        Self::from_slice(data, rows, cols, 1, rows.max(1) as isize)
    }

    /// Applies `op` on top of the current one.
    pub fn with_op(self, op: Op) -> Self {
        let trans = self.op.is_trans() ^ op.is_trans();
        let conj = self.op.is_conj() ^ op.is_conj();
        MatrixView {
            op: Op::from_flags(trans, conj),
            ..self
        }
    }

    /// Transpose.
    pub fn t(self) -> Self {
        self.with_op(Op::Trans)
    }

    /// Conjugate transpose.
    pub fn h(self) -> Self {
        self.with_op(Op::ConjTrans)
    }

    /// Element-wise conjugate.
    pub fn conj(self) -> Self {
        self.with_op(Op::ConjNoTrans)
    }

    /// The pending operation.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Rows of `op(X)`.
    pub fn rows(&self) -> usize {
        self.op.apply_dims(self.rows, self.cols).0
    }

    /// Columns of `op(X)`.
    pub fn cols(&self) -> usize {
        self.op.apply_dims(self.rows, self.cols).1
    }

    /// Element `(i, j)` of `op(X)`.
    ///
    /// # Panics
    ///
    /// Panics if `(i, j)` is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> T {
        assert!(i < self.rows() && j < self.cols(), "index ({i}, {j}) out of bounds");
        let (si, sj) = if self.op.is_trans() { (j, i) } else { (i, j) };
        let idx = self.base as isize + si as isize * self.rs + sj as isize * self.cs;
        let v = self.data[idx as usize];
        if self.op.is_conj() {
            v.conj()
        } else {
            v
        }
    }

    /// Raw view of `op(X)` for the scheduler.
    pub(crate) fn raw(&self) -> RawView<T> {
        // SAFETY: `base` was checked against the slice length by `locate`.
        let ptr = unsafe { self.data.as_ptr().add(self.base) };
        let stored = RawView {
            ptr,
            rows: self.rows,
            cols: self.cols,
            rs: self.rs,
            cs: self.cs,
            conj: self.op.is_conj(),
        };
        if self.op.is_trans() {
            stored.transposed()
        } else {
            stored
        }
    }
}

/// A mutable strided matrix view, used for the output `C`.
#[derive(Debug)]
pub struct MatrixViewMut<'a, T> {
    data: &'a mut [T],
    base: usize,
    rows: usize,
    cols: usize,
    rs: isize,
    cs: isize,
}

impl<'a, T: Element> MatrixViewMut<'a, T> {
    /// A `rows × cols` mutable view with explicit strides.
    pub fn from_slice(
        data: &'a mut [T],
        rows: usize,
        cols: usize,
        rs: isize,
        cs: isize,
    ) -> Result<Self> {
        let base = locate("C", data.len(), rows, cols, rs, cs)?;
        Ok(MatrixViewMut {
            data,
            base,
            rows,
            cols,
            rs,
            cs,
        })
    }

    /// A dense row-major mutable view.
    pub fn row_major(data: &'a mut [T], rows: usize, cols: usize) -> Result<Self> {
        Self::from_slice(data, rows, cols, cols.max(1) as isize, 1)
    }

    /// A dense column-major mutable view.
    pub fn col_major(data: &'a mut [T], rows: usize, cols: usize) -> Result<Self> {
        Self::from_slice(data, rows, cols, 1, rows.max(1) as isize)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Element `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if `(i, j)` is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> T {
        assert!(i < self.rows && j < self.cols, "index ({i}, {j}) out of bounds");
        let idx = self.base as isize + i as isize * self.rs + j as isize * self.cs;
        self.data[idx as usize]
    }

    pub(crate) fn raw(&mut self) -> RawViewMut<T> {
        // SAFETY: `base` was checked against the slice length by `locate`.
        let ptr = unsafe { self.data.as_mut_ptr().add(self.base) };
        RawViewMut {
            ptr,
            rows: self.rows,
            cols: self.cols,
            rs: self.rs,
            cs: self.cs,
        }
    }
}

/// Unchecked operand view used inside the engine: `op` is already folded
/// into the dimensions and strides, only conjugation remains to be applied
/// while packing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawView<T> {
    pub ptr: *const T,
    pub rows: usize,
    pub cols: usize,
    pub rs: isize,
    pub cs: isize,
    pub conj: bool,
}

// SAFETY: a `RawView` is only built from borrowed data that outlives the
// call it is used in, and is only read through.
unsafe impl<T: Send> Send for RawView<T> {}
unsafe impl<T: Sync> Sync for RawView<T> {}

impl<T> RawView<T> {
    /// Builds a view of `op(X)` over stored `X`.
    pub fn with_op(ptr: *const T, rows: usize, cols: usize, rs: isize, cs: isize, op: Op) -> Self {
        let stored = RawView {
            ptr,
            rows,
            cols,
            rs,
            cs,
            conj: op.is_conj(),
        };
        if op.is_trans() {
            stored.transposed()
        } else {
            stored
        }
    }

    /// The transposed view; no data moves.
    #[inline(always)]
    pub fn transposed(self) -> Self {
        RawView {
            ptr: self.ptr,
            rows: self.cols,
            cols: self.rows,
            rs: self.cs,
            cs: self.rs,
            conj: self.conj,
        }
    }

    /// Pointer to element `(i, j)`.
    ///
    /// # Safety
    ///
    /// `(i, j)` must be inside the view.
    #[inline(always)]
    pub unsafe fn at(&self, i: usize, j: usize) -> *const T {
        self.ptr.offset(i as isize * self.rs + j as isize * self.cs)
    }
}

/// Unchecked mutable view of the output.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawViewMut<T> {
    pub ptr: *mut T,
    pub rows: usize,
    pub cols: usize,
    pub rs: isize,
    pub cs: isize,
}

// SAFETY: workers write disjoint tiles of the output.
unsafe impl<T: Send> Send for RawViewMut<T> {}
unsafe impl<T: Send> Sync for RawViewMut<T> {}

impl<T> RawViewMut<T> {
    #[inline(always)]
    pub fn transposed(self) -> Self {
        RawViewMut {
            ptr: self.ptr,
            rows: self.cols,
            cols: self.rows,
            rs: self.cs,
            cs: self.rs,
        }
    }

    /// Pointer to element `(i, j)`.
    ///
    /// # Safety
    ///
    /// `(i, j)` must be inside the view.
    #[inline(always)]
    pub unsafe fn at(&self, i: usize, j: usize) -> *mut T {
        self.ptr.offset(i as isize * self.rs + j as isize * self.cs)
    }
}
