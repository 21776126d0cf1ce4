//! AVX2 + FMA microkernels for `f32` (8×8) and `f64` (4×8).
//!
//! Both kernels keep one 256-bit accumulator per output column. Each step of
//! the contraction loads one packed column of A as a full vector, broadcasts
//! the `nr` packed elements of B one at a time, and issues `nr` independent
//! FMAs. Availability is checked at runtime with `is_x86_feature_detected!`.

use crate::kernel::KernelInfo;

/// The 8×8 `f32` kernel, if the CPU supports AVX2 and FMA.
pub fn sgemm_8x8() -> Option<KernelInfo<f32>> {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return Some(KernelInfo {
                name: "avx2-fma-f32-8x8",
                mr: 8,
                nr: 8,
                ukr: x86::sgemm_kernel_8x8,
            });
        }
    }
    None
}

/// The 4×8 `f64` kernel, if the CPU supports AVX2 and FMA.
pub fn dgemm_4x8() -> Option<KernelInfo<f64>> {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return Some(KernelInfo {
                name: "avx2-fma-f64-4x8",
                mr: 4,
                nr: 8,
                ukr: x86::dgemm_kernel_4x8,
            });
        }
    }
    None
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::*;

    /// 8×8 single-precision tile.
    ///
    /// # Safety
    ///
    /// Requires AVX2 and FMA. Pointer requirements are those of
    /// [`MicroKernelFn`](crate::kernel::MicroKernelFn) with `mr = nr = 8`.
    #[target_feature(enable = "avx2,fma")]
    #[allow(clippy::too_many_arguments)]
    pub(super) unsafe fn sgemm_kernel_8x8(
        kc: usize,
        alpha: f32,
        a: *const f32,
        b: *const f32,
        beta: f32,
        c: *mut f32,
        rsc: isize,
        csc: isize,
    ) {
        let mut c0 = _mm256_setzero_ps();
        let mut c1 = _mm256_setzero_ps();
        let mut c2 = _mm256_setzero_ps();
        let mut c3 = _mm256_setzero_ps();
        let mut c4 = _mm256_setzero_ps();
        let mut c5 = _mm256_setzero_ps();
        let mut c6 = _mm256_setzero_ps();
        let mut c7 = _mm256_setzero_ps();

        for p in 0..kc {
            let a_col = _mm256_loadu_ps(a.add(p * 8));
            let b_row = b.add(p * 8);

            // Interleave independent FMAs to hide latency.
            c0 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row), c0);
            c4 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(4)), c4);
            c1 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(1)), c1);
            c5 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(5)), c5);
            c2 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(2)), c2);
            c6 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(6)), c6);
            c3 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(3)), c3);
            c7 = _mm256_fmadd_ps(a_col, _mm256_broadcast_ss(&*b_row.add(7)), c7);
        }

        let alpha_v = _mm256_set1_ps(alpha);
        let cols = [
            _mm256_mul_ps(c0, alpha_v),
            _mm256_mul_ps(c1, alpha_v),
            _mm256_mul_ps(c2, alpha_v),
            _mm256_mul_ps(c3, alpha_v),
            _mm256_mul_ps(c4, alpha_v),
            _mm256_mul_ps(c5, alpha_v),
            _mm256_mul_ps(c6, alpha_v),
            _mm256_mul_ps(c7, alpha_v),
        ];

        if rsc == 1 {
            let beta_v = _mm256_set1_ps(beta);
            for (j, col) in cols.iter().enumerate() {
                let c_col = c.offset(j as isize * csc);
                let out = if beta == 0.0 {
                    *col
                } else {
                    _mm256_fmadd_ps(_mm256_loadu_ps(c_col), beta_v, *col)
                };
                _mm256_storeu_ps(c_col, out);
            }
        } else {
            let mut tile = [0.0f32; 64];
            for (j, col) in cols.iter().enumerate() {
                _mm256_storeu_ps(tile.as_mut_ptr().add(j * 8), *col);
            }
            store_strided(&tile, 8, 8, beta, c, rsc, csc);
        }
    }

    /// 4×8 double-precision tile.
    ///
    /// # Safety
    ///
    /// Requires AVX2 and FMA. Pointer requirements are those of
    /// [`MicroKernelFn`](crate::kernel::MicroKernelFn) with `mr = 4`, `nr = 8`.
    #[target_feature(enable = "avx2,fma")]
    #[allow(clippy::too_many_arguments)]
    pub(super) unsafe fn dgemm_kernel_4x8(
        kc: usize,
        alpha: f64,
        a: *const f64,
        b: *const f64,
        beta: f64,
        c: *mut f64,
        rsc: isize,
        csc: isize,
    ) {
        let mut c0 = _mm256_setzero_pd();
        let mut c1 = _mm256_setzero_pd();
        let mut c2 = _mm256_setzero_pd();
        let mut c3 = _mm256_setzero_pd();
        let mut c4 = _mm256_setzero_pd();
        let mut c5 = _mm256_setzero_pd();
        let mut c6 = _mm256_setzero_pd();
        let mut c7 = _mm256_setzero_pd();

        for p in 0..kc {
            let a_col = _mm256_loadu_pd(a.add(p * 4));
            let b_row = b.add(p * 8);

            c0 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row), c0);
            c4 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(4)), c4);
            c1 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(1)), c1);
            c5 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(5)), c5);
            c2 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(2)), c2);
            c6 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(6)), c6);
            c3 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(3)), c3);
            c7 = _mm256_fmadd_pd(a_col, _mm256_broadcast_sd(&*b_row.add(7)), c7);
        }

        let alpha_v = _mm256_set1_pd(alpha);
        let cols = [
            _mm256_mul_pd(c0, alpha_v),
            _mm256_mul_pd(c1, alpha_v),
            _mm256_mul_pd(c2, alpha_v),
            _mm256_mul_pd(c3, alpha_v),
            _mm256_mul_pd(c4, alpha_v),
            _mm256_mul_pd(c5, alpha_v),
            _mm256_mul_pd(c6, alpha_v),
            _mm256_mul_pd(c7, alpha_v),
        ];

        if rsc == 1 {
            let beta_v = _mm256_set1_pd(beta);
            for (j, col) in cols.iter().enumerate() {
                let c_col = c.offset(j as isize * csc);
                let out = if beta == 0.0 {
                    *col
                } else {
                    _mm256_fmadd_pd(_mm256_loadu_pd(c_col), beta_v, *col)
                };
                _mm256_storeu_pd(c_col, out);
            }
        } else {
            let mut tile = [0.0f64; 32];
            for (j, col) in cols.iter().enumerate() {
                _mm256_storeu_pd(tile.as_mut_ptr().add(j * 4), *col);
            }
            store_strided(&tile, 4, 8, beta, c, rsc, csc);
        }
    }

    /// Writes an already alpha-scaled column-major `mr × nr` tile to a
    /// general-stride destination.
    #[inline(always)]
    unsafe fn store_strided<T>(
        tile: &[T],
        mr: usize,
        nr: usize,
        beta: T,
        c: *mut T,
        rsc: isize,
        csc: isize,
    ) where
        T: Copy + PartialEq + num::traits::Zero + std::ops::Mul<Output = T>,
    {
        let overwrite = beta.is_zero();
        for j in 0..nr {
            for i in 0..mr {
                let cij = c.offset(i as isize * rsc + j as isize * csc);
                let v = tile[j * mr + i];
                *cij = if overwrite { v } else { beta * *cij + v };
            }
        }
    }
}
