#![allow(dead_code)]

use gemmly::{Complex32, Complex64, Element, Op};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Element types the tests know how to generate and compare.
pub trait TestElement: Element + std::fmt::Display {
    /// Machine epsilon of the underlying real type.
    const EPS: f64;

    fn sample(rng: &mut StdRng) -> Self;

    fn distance(self, other: Self) -> f64;

    fn magnitude(self) -> f64;

    fn nan() -> Self;
}

impl TestElement for f32 {
    const EPS: f64 = f32::EPSILON as f64;

    fn sample(rng: &mut StdRng) -> Self {
        rng.random_range(-1.0..1.0)
    }

    fn distance(self, other: Self) -> f64 {
        (self as f64 - other as f64).abs()
    }

    fn magnitude(self) -> f64 {
        (self as f64).abs()
    }

    fn nan() -> Self {
        f32::NAN
    }
}

impl TestElement for f64 {
    const EPS: f64 = f64::EPSILON;

    fn sample(rng: &mut StdRng) -> Self {
        rng.random_range(-1.0..1.0)
    }

    fn distance(self, other: Self) -> f64 {
        (self - other).abs()
    }

    fn magnitude(self) -> f64 {
        self.abs()
    }

    fn nan() -> Self {
        f64::NAN
    }
}

impl TestElement for Complex32 {
    const EPS: f64 = f32::EPSILON as f64;

    fn sample(rng: &mut StdRng) -> Self {
        Complex32::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0))
    }

    fn distance(self, other: Self) -> f64 {
        (self - other).norm() as f64
    }

    fn magnitude(self) -> f64 {
        self.norm() as f64
    }

    fn nan() -> Self {
        Complex32::new(f32::NAN, f32::NAN)
    }
}

impl TestElement for Complex64 {
    const EPS: f64 = f64::EPSILON;

    fn sample(rng: &mut StdRng) -> Self {
        Complex64::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0))
    }

    fn distance(self, other: Self) -> f64 {
        (self - other).norm()
    }

    fn magnitude(self) -> f64 {
        self.norm()
    }

    fn nan() -> Self {
        Complex64::new(f64::NAN, f64::NAN)
    }
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vec<T: TestElement>(rng: &mut StdRng, len: usize) -> Vec<T> {
    (0..len).map(|_| T::sample(rng)).collect()
}

/// A strided matrix stored in a slice, as passed to `gemm`.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
    pub rs: isize,
    pub cs: isize,
}

impl Layout {
    pub fn col_major(rows: usize, cols: usize) -> Self {
        Layout {
            rows,
            cols,
            rs: 1,
            cs: rows.max(1) as isize,
        }
    }

    pub fn row_major(rows: usize, cols: usize) -> Self {
        Layout {
            rows,
            cols,
            rs: cols.max(1) as isize,
            cs: 1,
        }
    }

    /// Column-major with a padded leading dimension.
    pub fn padded(rows: usize, cols: usize, ld: usize) -> Self {
        Layout {
            rows,
            cols,
            rs: 1,
            cs: ld as isize,
        }
    }

    /// The same storage walked with both strides negated.
    pub fn reversed(self) -> Self {
        Layout {
            rs: -self.rs,
            cs: -self.cs,
            ..self
        }
    }

    /// Slice index of `(0, 0)`.
    pub fn base(&self) -> isize {
        let mut base = 0;
        if self.rs < 0 && self.rows > 0 {
            base += (self.rows as isize - 1) * -self.rs;
        }
        if self.cs < 0 && self.cols > 0 {
            base += (self.cols as isize - 1) * -self.cs;
        }
        base
    }

    /// Slice length needed to hold the matrix.
    pub fn len(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            return 0;
        }
        ((self.rows - 1) * self.rs.unsigned_abs() + (self.cols - 1) * self.cs.unsigned_abs()) + 1
    }

    pub fn index(&self, i: usize, j: usize) -> usize {
        (self.base() + i as isize * self.rs + j as isize * self.cs) as usize
    }
}

/// Element `(i, j)` of `op(X)` for `X` stored with `layout`.
pub fn op_get<T: Element>(data: &[T], layout: &Layout, op: Op, i: usize, j: usize) -> T {
    let (si, sj) = if op.is_trans() { (j, i) } else { (i, j) };
    let v = data[layout.index(si, sj)];
    if op.is_conj() {
        v.conj()
    } else {
        v
    }
}

/// Triple-loop reference for `C = alpha * op(A)·op(B) + beta * C`.
#[allow(clippy::too_many_arguments)]
pub fn reference_gemm<T: Element>(
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    la: &Layout,
    b: &[T],
    lb: &Layout,
    beta: T,
    c: &mut [T],
    lc: &Layout,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = T::zero();
            for p in 0..k {
                sum = sum + op_get(a, la, opa, i, p) * op_get(b, lb, opb, p, j);
            }
            let idx = lc.index(i, j);
            c[idx] = if beta.is_zero() {
                alpha * sum
            } else {
                alpha * sum + beta * c[idx]
            };
        }
    }
}

/// Asserts every element of the `m × n` matrix is within `k · ε` of the
/// reference, scaled by the problem's magnitude.
pub fn assert_gemm_close<T: TestElement>(
    got: &[T],
    expected: &[T],
    lc: &Layout,
    k: usize,
    scale: f64,
    what: &str,
) {
    let tol = 4.0 * (k.max(1) as f64) * T::EPS * scale.max(1.0);
    for j in 0..lc.cols {
        for i in 0..lc.rows {
            let idx = lc.index(i, j);
            let (g, e) = (got[idx], expected[idx]);
            assert!(
                g.distance(e) <= tol,
                "{what}: C({i}, {j}) = {g}, expected {e} (tolerance {tol:e})"
            );
        }
    }
}
