//! Numeric element types supported by the engine.
//!
//! The blocked algorithm is written once, generic over [`Element`]. The trait
//! is sealed: packing buffers are recycled across element types, which is only
//! sound for plain floating-point data where every bit pattern is a valid
//! value.

use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

use num::complex::{Complex32, Complex64};
use num::traits::{One, Zero};

use crate::context::Context;
use crate::kernel::{avx2, KernelInfo};

mod private {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for num::complex::Complex32 {}
    impl Sealed for num::complex::Complex64 {}
}

/// A matrix element: `f32`, `f64`, [`Complex32`] or [`Complex64`].
pub trait Element:
    private::Sealed
    + Copy
    + Send
    + Sync
    + Debug
    + PartialEq
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    /// The underlying real type (`Self` for real elements).
    type Real: Copy + Send + Sync + Debug + PartialEq + Zero + One + 'static;

    /// Whether conjugation is meaningful for this type.
    const IS_COMPLEX: bool;

    /// Short BLAS-style type name (`s`, `d`, `c`, `z`).
    const NAME: &'static str;

    /// Tile shape `(mr, nr)` of the portable kernel used when no SIMD kernel
    /// is available.
    const PORTABLE_TILE: (usize, usize);

    /// Complex conjugate; identity for real types.
    fn conj(self) -> Self;

    /// Real part.
    fn re(self) -> Self::Real;

    /// Embeds a real value.
    fn from_real(re: Self::Real) -> Self;

    /// The SIMD kernel for this type on the running CPU, if any.
    fn simd_kernel() -> Option<KernelInfo<Self>>;

    /// Process-wide default context, built on first use.
    fn shared_context() -> &'static Context<Self>;
}

macro_rules! impl_real_element {
    ($t:ty, $name:literal, $tile:expr, $simd:expr) => {
        impl Element for $t {
            type Real = $t;

            const IS_COMPLEX: bool = false;
            const NAME: &'static str = $name;
            const PORTABLE_TILE: (usize, usize) = $tile;

            #[inline(always)]
            fn conj(self) -> Self {
                self
            }

            #[inline(always)]
            fn re(self) -> Self::Real {
                self
            }

            #[inline(always)]
            fn from_real(re: Self::Real) -> Self {
                re
            }

            fn simd_kernel() -> Option<KernelInfo<Self>> {
                $simd
            }

            fn shared_context() -> &'static Context<Self> {
                static CONTEXT: OnceLock<Context<$t>> = OnceLock::new();
                CONTEXT.get_or_init(Context::new)
            }
        }
    };
}

macro_rules! impl_complex_element {
    ($t:ty, $real:ty, $name:literal, $tile:expr) => {
        impl Element for $t {
            type Real = $real;

            const IS_COMPLEX: bool = true;
            const NAME: &'static str = $name;
            const PORTABLE_TILE: (usize, usize) = $tile;

            #[inline(always)]
            fn conj(self) -> Self {
                <$t>::new(self.re, -self.im)
            }

            #[inline(always)]
            fn re(self) -> Self::Real {
                self.re
            }

            #[inline(always)]
            fn from_real(re: Self::Real) -> Self {
                <$t>::new(re, 0.0)
            }

            fn simd_kernel() -> Option<KernelInfo<Self>> {
                None
            }

            fn shared_context() -> &'static Context<Self> {
                static CONTEXT: OnceLock<Context<$t>> = OnceLock::new();
                CONTEXT.get_or_init(Context::new)
            }
        }
    };
}

impl_real_element!(f32, "s", (8, 8), avx2::sgemm_8x8());
impl_real_element!(f64, "d", (4, 8), avx2::dgemm_4x8());
impl_complex_element!(Complex32, f32, "c", (4, 4));
impl_complex_element!(Complex64, f64, "z", (4, 2));
