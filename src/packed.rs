//! Pre-packed operands.
//!
//! When the same `A` (or `B`) is multiplied many times, it can be packed once
//! with [`Context::pack_a`] / [`Context::pack_b`] and reused through
//! [`Context::compute`]. The packed form holds every contraction block of
//! the operand in the layout the scheduler reads, so compute skips packing
//! for that operand entirely.
//!
//! `alpha` is absorbed into the packed operand at pack time. `compute` then
//! multiplies with `alpha = 1`; if both operands are pre-packed with scales,
//! the product carries both.

use std::marker::PhantomData;

use log::debug;

use crate::context::Context;
use crate::element::Element;
use crate::error::{out_of_memory, shape_mismatch, unsupported, Result};
use crate::pack::{pack_block, packed_len, Block};
use crate::pool::{AlignedBuf, ALIGNMENT};
use crate::scheduler::Source;
use crate::view::{locate, Op, RawView, RawViewMut};

/// Which side of the product a packed operand belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackRole {
    /// Left operand, `op(A)` of shape `m × k`.
    A,
    /// Right operand, `op(B)` of shape `k × n`.
    B,
}

/// An operand packed for one tile shape and contraction block size.
pub struct PackedMatrix<T: Element> {
    role: PackRole,
    rows: usize,
    cols: usize,
    edge: usize,
    kc: usize,
    offsets: Vec<usize>,
    len: usize,
    buf: Option<AlignedBuf>,
    _marker: PhantomData<T>,
}

impl<T: Element> std::fmt::Debug for PackedMatrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedMatrix")
            .field("role", &self.role)
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("edge", &self.edge)
            .field("kc", &self.kc)
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Element> PackedMatrix<T> {
    pub fn role(&self) -> PackRole {
        self.role
    }

    /// Rows of the packed `op(X)`.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Columns of the packed `op(X)`.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Packed elements, padding included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_slice(&self) -> &[T] {
        match &self.buf {
            // SAFETY: the buffer holds `len` initialised elements.
            Some(buf) => unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<T>(), self.len) },
            None => &[],
        }
    }

    /// Panels for rows (A) or columns (B) `start..start + len` of contraction
    /// block `q`. `start` must be a multiple of the tile edge.
    pub(crate) fn block(&self, q: usize, start: usize, len: usize) -> &[T] {
        debug_assert_eq!(start % self.edge, 0);
        let depth = self.contraction();
        let kcb = self.kc.min(depth - q * self.kc);
        let begin = self.offsets[q] + (start / self.edge) * self.edge * kcb;
        &self.as_slice()[begin..begin + packed_len(len, kcb, self.edge)]
    }

    fn contraction(&self) -> usize {
        match self.role {
            PackRole::A => self.cols,
            PackRole::B => self.rows,
        }
    }
}

/// One side of a [`Context::compute`] call.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a, T: Element> {
    /// A strided matrix, packed on the fly.
    Unpacked {
        op: Op,
        data: &'a [T],
        rs: isize,
        cs: isize,
    },
    /// A matrix packed ahead of time.
    Packed(&'a PackedMatrix<T>),
}

impl<T: Element> Context<T> {
    /// Number of elements [`pack_a`](Self::pack_a) (`role = A`, `m × k`) or
    /// [`pack_b`](Self::pack_b) (`role = B`, `k × n`) would store with this
    /// context.
    pub fn packed_size(&self, role: PackRole, m: usize, n: usize, k: usize) -> usize {
        let (extent, edge) = match role {
            PackRole::A => (m, self.kernel().mr),
            PackRole::B => (n, self.kernel().nr),
        };
        let kc = self.blocking().kc;
        (0..k)
            .step_by(kc)
            .map(|pc| packed_len(extent, kc.min(k - pc), edge))
            .sum()
    }

    /// Packs `alpha * op(A)` (`m × k`) for later use as the left operand.
    #[allow(clippy::too_many_arguments)]
    pub fn pack_a(
        &self,
        op: Op,
        m: usize,
        k: usize,
        alpha: T,
        a: &[T],
        rsa: isize,
        csa: isize,
    ) -> Result<PackedMatrix<T>> {
        let (rows, cols) = op.apply_dims(m, k);
        let base = locate("A", a.len(), rows, cols, rsa, csa)?;
        // SAFETY: checked by `locate`.
        let view = RawView::with_op(unsafe { a.as_ptr().add(base) }, rows, cols, rsa, csa, op);
        self.pack(PackRole::A, view, m, k, alpha)
    }

    /// Packs `alpha * op(B)` (`k × n`) for later use as the right operand.
    #[allow(clippy::too_many_arguments)]
    pub fn pack_b(
        &self,
        op: Op,
        k: usize,
        n: usize,
        alpha: T,
        b: &[T],
        rsb: isize,
        csb: isize,
    ) -> Result<PackedMatrix<T>> {
        let (rows, cols) = op.apply_dims(k, n);
        let base = locate("B", b.len(), rows, cols, rsb, csb)?;
        // SAFETY: checked by `locate`.
        let view = RawView::with_op(unsafe { b.as_ptr().add(base) }, rows, cols, rsb, csb, op);
        self.pack(PackRole::B, view, k, n, alpha)
    }

    fn pack(&self, role: PackRole, view: RawView<T>, rows: usize, cols: usize, alpha: T) -> Result<PackedMatrix<T>> {
        // B is packed as the transpose of an A operand: major extent n.
        let (view, extent, depth, edge) = match role {
            PackRole::A => (view, rows, cols, self.kernel().mr),
            PackRole::B => (view.transposed(), cols, rows, self.kernel().nr),
        };
        let kc = self.blocking().kc;

        let mut offsets = Vec::with_capacity(depth.div_ceil(kc));
        let mut len = 0usize;
        for pc in (0..depth).step_by(kc) {
            offsets.push(len);
            len += packed_len(extent, kc.min(depth - pc), edge);
        }

        let buf = if len == 0 {
            None
        } else {
            let bytes = len
                .checked_mul(std::mem::size_of::<T>())
                .ok_or_else(|| out_of_memory(usize::MAX, ALIGNMENT))?;
            Some(AlignedBuf::zeroed(bytes)?)
        };

        let mut packed = PackedMatrix {
            role,
            rows,
            cols,
            edge,
            kc,
            offsets,
            len,
            buf,
            _marker: PhantomData,
        };

        if let Some(buf) = &mut packed.buf {
            // SAFETY: the buffer holds `len` zeroed elements.
            let dst = unsafe { std::slice::from_raw_parts_mut(buf.as_ptr().cast::<T>(), len) };
            let scale = (alpha != T::one()).then_some(alpha);
            let parallel = self.num_threads() > 1;
            let offsets = &packed.offsets;
            self.install(|| {
                for (q, pc) in (0..depth).step_by(kc).enumerate() {
                    let block = Block {
                        start: 0,
                        len: extent,
                        k0: pc,
                        kc: kc.min(depth - pc),
                    };
                    // SAFETY: `view` covers `extent x depth`; each region
                    // starts at its recorded offset.
                    unsafe { pack_block(&mut dst[offsets[q]..], &view, block, edge, scale, parallel) };
                }
            });
        }

        debug!(
            "packed {rows}x{cols} {:?} operand: {len} elements, edge {edge}, kc {kc}",
            role
        );
        Ok(packed)
    }

    /// `C = op(A) · op(B) + beta * C` where either operand may be pre-packed.
    ///
    /// The scale given to [`pack_a`](Self::pack_a) / [`pack_b`](Self::pack_b)
    /// stands in for `alpha`.
    ///
    /// # Errors
    ///
    /// [`UnsupportedConfiguration`](crate::GemmError::UnsupportedConfiguration)
    /// if a packed operand was made for another side or by a context with a
    /// different tile shape or `kc`;
    /// [`ShapeMismatch`](crate::GemmError::ShapeMismatch) if its dimensions
    /// do not match `m`, `n`, `k`.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &self,
        a: Operand<'_, T>,
        b: Operand<'_, T>,
        m: usize,
        n: usize,
        k: usize,
        beta: T,
        c: &mut [T],
        rsc: isize,
        csc: isize,
    ) -> Result<()> {
        let a = self.resolve(a, PackRole::A, m, k)?;
        let b = self.resolve(b, PackRole::B, k, n)?;
        let c_base = locate("C", c.len(), m, n, rsc, csc)?;

        // SAFETY: `locate` checked C against the slice; operands were
        // checked by `resolve`.
        unsafe {
            let c = RawViewMut {
                ptr: c.as_mut_ptr().add(c_base),
                rows: m,
                cols: n,
                rs: rsc,
                cs: csc,
            };
            self.execute(m, n, k, T::one(), a, b, beta, c, None)
        }
    }

    fn resolve<'a>(&self, operand: Operand<'a, T>, role: PackRole, rows: usize, cols: usize) -> Result<Source<'a, T>> {
        let name = match role {
            PackRole::A => "A",
            PackRole::B => "B",
        };
        match operand {
            Operand::Unpacked { op, data, rs, cs } => {
                let (sr, sc) = op.apply_dims(rows, cols);
                let base = locate(name, data.len(), sr, sc, rs, cs)?;
                // SAFETY: checked by `locate`.
                let ptr = unsafe { data.as_ptr().add(base) };
                Ok(Source::View(RawView::with_op(ptr, sr, sc, rs, cs, op)))
            }
            Operand::Packed(packed) => {
                if packed.role != role {
                    return Err(unsupported(format!(
                        "operand {name} was packed as {:?}",
                        packed.role
                    )));
                }
                let edge = match role {
                    PackRole::A => self.kernel().mr,
                    PackRole::B => self.kernel().nr,
                };
                if packed.edge != edge || packed.kc != self.blocking().kc {
                    return Err(unsupported(format!(
                        "operand {name} was packed for edge {} and kc {}, context uses edge {} and kc {}",
                        packed.edge,
                        packed.kc,
                        edge,
                        self.blocking().kc
                    )));
                }
                if packed.rows != rows || packed.cols != cols {
                    return Err(shape_mismatch(format!(
                        "packed operand {name} is {}x{}, expected {rows}x{cols}",
                        packed.rows, packed.cols
                    )));
                }
                Ok(Source::Packed(packed))
            }
        }
    }
}
