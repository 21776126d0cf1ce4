//! # gemmly
//!
//! Blocked dense matrix multiplication for `f32`, `f64`, `Complex32` and
//! `Complex64`:
//!
//! ```text
//! C = alpha * op(A) · op(B) + beta * C
//! ```
//!
//! The engine follows the Goto / BLIS design: operands are packed into
//! cache-sized blocks of micro-panels, a register-blocked microkernel sweeps
//! each `mr × nr` tile, and edge tiles go through a dedicated fringe path.
//! Rows of C are distributed over a rayon pool. Small and skinny problems
//! skip packing and read their operands in place.
//!
//! ```rust
//! use gemmly::{gemm, Op};
//!
//! // 2x3 · 3x2, all row-major.
//! let a = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let b = [7.0f64, 8.0, 9.0, 10.0, 11.0, 12.0];
//! let mut c = [0.0f64; 4];
//! gemm(Op::NoTrans, Op::NoTrans, 2, 2, 3, 1.0, &a, 3, 1, &b, 2, 1, 0.0, &mut c, 2, 1).unwrap();
//! assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
//! ```
//!
//! Configuration (kernel, blocking sizes, small-problem thresholds, fringe
//! strategy, threads) lives in a [`Context`]; the free functions use a
//! process-wide default context.

pub mod context;
pub mod driver;
pub mod element;
pub mod error;
pub mod fringe;
pub mod kernel;
mod pack;
pub mod packed;
pub mod params;
pub mod pool;
mod rankk;
mod scheduler;
mod unpacked;
pub mod view;

pub use context::{Context, ContextBuilder};
pub use driver::{gemm, gemm_raw, multiply};
pub use element::Element;
pub use error::{GemmError, Result};
pub use fringe::FringeStrategy;
pub use kernel::{KernelChoice, KernelInfo, MicroKernelFn};
pub use packed::{Operand, PackRole, PackedMatrix};
pub use params::{BlockingParams, CacheSizes, SmallThresholds};
pub use view::{MatrixView, MatrixViewMut, Op, Uplo};

pub use num::complex::{Complex32, Complex64};
