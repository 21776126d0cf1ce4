//! Real-valued GEMM against a triple-loop reference.
//!
//! Covers fringe shapes, transposes, row-major and negative-stride layouts,
//! thread counts, every built-in kernel and the unpacked small-problem path.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_abs_diff_eq;
use common::{assert_gemm_close, random_vec, reference_gemm, rng, Layout, TestElement};
use gemmly::kernel::generic;
use gemmly::{
    gemm, gemm_raw, multiply, BlockingParams, Context, FringeStrategy, KernelChoice, KernelInfo,
    MatrixView, MatrixViewMut, Op, SmallThresholds,
};
use ndarray::Array2;

/// Shapes that exercise full tiles, fringes on both edges and several
/// blocks in every dimension.
const SHAPES: &[(usize, usize, usize)] = &[
    (1, 1, 1),
    (3, 5, 2),
    (8, 8, 8),
    (17, 9, 33),
    (64, 31, 70),
    (130, 77, 301),
];

fn small_blocks<T: gemmly::Element>(threads: usize) -> Context<T> {
    Context::builder()
        .blocking(BlockingParams::new(32, 24, 48))
        .num_threads(threads)
        .build()
        .unwrap()
}

#[allow(clippy::too_many_arguments)]
fn check_against_reference<T: TestElement>(
    ctx: &Context<T>,
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    beta: T,
    layouts: (Layout, Layout, Layout),
    seed: u64,
) {
    let (la, lb, lc) = layouts;
    let mut rng = rng(seed);
    let a: Vec<T> = random_vec(&mut rng, la.len());
    let b: Vec<T> = random_vec(&mut rng, lb.len());
    let mut c: Vec<T> = random_vec(&mut rng, lc.len());
    if beta.is_zero() {
        // beta = 0 must not read C.
        c.iter_mut().for_each(|v| *v = T::nan());
    }
    let mut expected = c.clone();

    reference_gemm(opa, opb, m, n, k, alpha, &a, &la, &b, &lb, beta, &mut expected, &lc);
    ctx.gemm(opa, opb, m, n, k, alpha, &a, la.rs, la.cs, &b, lb.rs, lb.cs, beta, &mut c, lc.rs, lc.cs)
        .unwrap();

    let scale = 2.0 * (alpha.magnitude() + beta.magnitude());
    let what = format!("{}gemm {opa:?}/{opb:?} {m}x{n}x{k}", T::NAME);
    assert_gemm_close(&c, &expected, &lc, k, scale, &what);
}

#[test]
fn test_beta_zero_matches_reference_f64() {
    let ctx = small_blocks::<f64>(1);
    for (seed, &(m, n, k)) in SHAPES.iter().enumerate() {
        let layouts = (Layout::col_major(m, k), Layout::col_major(k, n), Layout::col_major(m, n));
        check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 1.0, 0.0, layouts, seed as u64);
    }
}

#[test]
fn test_beta_zero_matches_reference_f32_default_context() {
    let ctx = Context::<f32>::new();
    for (seed, &(m, n, k)) in SHAPES.iter().enumerate() {
        let layouts = (Layout::col_major(m, k), Layout::col_major(k, n), Layout::col_major(m, n));
        check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 1.0, 0.0, layouts, 100 + seed as u64);
    }
}

#[test]
fn test_alpha_beta_general() {
    let ctx = small_blocks::<f64>(1);
    let (m, n, k) = (45, 38, 57);
    let layouts = (Layout::col_major(m, k), Layout::col_major(k, n), Layout::col_major(m, n));
    check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, -1.25, 0.75, layouts, 7);
}

#[test]
fn test_all_transpose_combinations() {
    let ctx = small_blocks::<f64>(1);
    let (m, n, k) = (29, 23, 41);
    for opa in [Op::NoTrans, Op::Trans] {
        for opb in [Op::NoTrans, Op::Trans] {
            let (ar, ac) = opa.apply_dims(m, k);
            let (br, bc) = opb.apply_dims(k, n);
            let layouts = (Layout::col_major(ar, ac), Layout::row_major(br, bc), Layout::col_major(m, n));
            check_against_reference(&ctx, opa, opb, m, n, k, 1.5, 0.5, layouts, 11);
        }
    }
}

#[test]
fn test_row_major_output() {
    let ctx = small_blocks::<f32>(1);
    let (m, n, k) = (37, 50, 19);
    let layouts = (Layout::row_major(m, k), Layout::row_major(k, n), Layout::row_major(m, n));
    check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 1.0, 1.0, layouts, 21);
}

#[test]
fn test_padded_and_negative_strides() {
    let ctx = small_blocks::<f64>(1);
    let (m, n, k) = (21, 14, 26);
    let layouts = (
        Layout::padded(m, k, m + 5).reversed(),
        Layout::row_major(k, n).reversed(),
        Layout::padded(m, n, m + 3),
    );
    check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 2.0, -1.0, layouts, 31);

    let layouts = (
        Layout::col_major(m, k),
        Layout {
            rows: k,
            cols: n,
            rs: -1,
            cs: k as isize,
        },
        Layout::row_major(m, n).reversed(),
    );
    check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 1.0, 0.0, layouts, 32);
}

#[test]
fn test_every_portable_tile_and_fringe_strategy() {
    let (m, n, k) = (27, 19, 35);
    for (mr, nr) in [(1, 1), (2, 4), (4, 2), (6, 8), (8, 6), (16, 4), (4, 16)] {
        for fringe in [FringeStrategy::Padded, FringeStrategy::Scalar] {
            let ctx = Context::<f64>::builder()
                .kernel(KernelChoice::PortableTile { mr, nr })
                .blocking(BlockingParams::new(16, 12, 16))
                .small_thresholds(SmallThresholds::never())
                .fringe(fringe)
                .num_threads(1)
                .build()
                .unwrap();
            let layouts = (Layout::col_major(m, k), Layout::col_major(k, n), Layout::col_major(m, n));
            check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 0.5, 2.0, layouts, 41);
        }
    }
}

#[test]
fn test_simd_kernels_when_available() {
    if let Ok(ctx) = Context::<f32>::builder().kernel(KernelChoice::Simd).build() {
        let (m, n, k) = (67, 45, 129);
        let layouts = (Layout::col_major(m, k), Layout::col_major(k, n), Layout::col_major(m, n));
        check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, 1.0, 0.0, layouts, 51);
    }
    if let Ok(ctx) = Context::<f64>::builder().kernel(KernelChoice::Simd).build() {
        let (m, n, k) = (30, 70, 90);
        let layouts = (Layout::row_major(m, k), Layout::col_major(k, n), Layout::padded(m, n, 33));
        check_against_reference(&ctx, Op::NoTrans, Op::NoTrans, m, n, k, -0.5, 1.5, layouts, 52);
    }
}

#[test]
fn test_hand_computed_4x4() {
    let ctx = Context::<f64>::builder()
        .kernel(KernelChoice::PortableTile { mr: 2, nr: 2 })
        .build()
        .unwrap();
    let a: Vec<f64> = (1..=16).map(f64::from).collect();
    let mut c = vec![0.0; 16];

    ctx.gemm(Op::NoTrans, Op::NoTrans, 4, 4, 4, 1.0, &a, 4, 1, &a, 4, 1, 0.0, &mut c, 4, 1)
        .unwrap();

    let expected = [
        [90.0, 100.0, 110.0, 120.0],
        [202.0, 228.0, 254.0, 280.0],
        [314.0, 356.0, 398.0, 440.0],
        [426.0, 484.0, 542.0, 600.0],
    ];
    for i in 0..4 {
        for j in 0..4 {
            assert_eq!(c[i * 4 + j], expected[i][j], "C({i}, {j})");
        }
    }
}

#[test]
fn test_alpha_zero_beta_one_is_bit_identical() {
    let mut rng = rng(61);
    let (m, n, k) = (33, 29, 40);
    let a: Vec<f64> = random_vec(&mut rng, m * k);
    let b: Vec<f64> = random_vec(&mut rng, k * n);
    let mut c: Vec<f64> = random_vec(&mut rng, m * n);
    c[5] = f64::NAN;
    c[7] = f64::INFINITY;
    let before: Vec<u64> = c.iter().map(|v| v.to_bits()).collect();

    gemm(Op::NoTrans, Op::NoTrans, m, n, k, 0.0, &a, 1, m as isize, &b, 1, k as isize, 1.0, &mut c, 1, m as isize)
        .unwrap();

    let after: Vec<u64> = c.iter().map(|v| v.to_bits()).collect();
    assert_eq!(before, after);
}

static CALLS: AtomicUsize = AtomicUsize::new(0);

#[allow(clippy::too_many_arguments)]
unsafe fn counting_kernel(
    kc: usize,
    alpha: f64,
    a: *const f64,
    b: *const f64,
    beta: f64,
    c: *mut f64,
    rsc: isize,
    csc: isize,
) {
    CALLS.fetch_add(1, Ordering::SeqCst);
    generic::kernel::<f64, 2, 2>(kc, alpha, a, b, beta, c, rsc, csc);
}

#[test]
fn test_k_zero_scales_without_kernel_calls() {
    let ctx = Context::<f64>::builder()
        .custom_kernel(KernelInfo {
            name: "counting-2x2",
            mr: 2,
            nr: 2,
            ukr: counting_kernel,
        })
        .small_thresholds(SmallThresholds::never())
        .fringe(FringeStrategy::Scalar)
        .num_threads(1)
        .build()
        .unwrap();

    let (m, n) = (3, 5);
    let mut c: Vec<f64> = (0..m * n).map(|v| v as f64 - 4.0).collect();
    let empty: [f64; 0] = [];
    ctx.gemm(Op::NoTrans, Op::NoTrans, m, n, 0, 1.0, &empty, 1, m as isize, &empty, 1, 1, 2.0, &mut c, 1, m as isize)
        .unwrap();

    let expected: Vec<f64> = (0..m * n).map(|v| 2.0 * (v as f64 - 4.0)).collect();
    assert_eq!(c, expected);
    assert_eq!(CALLS.load(Ordering::SeqCst), 0, "kernel ran for k = 0");

    // The same context does call the kernel once there is work: 2 full tiles
    // of a 4x4 output with k = 1.
    let a = [1.0; 4];
    let mut c = [0.0; 16];
    ctx.gemm(Op::NoTrans, Op::NoTrans, 4, 4, 1, 1.0, &a, 1, 4, &a, 1, 1, 0.0, &mut c, 1, 4)
        .unwrap();
    assert_eq!(CALLS.load(Ordering::SeqCst), 4);
    assert!(c.iter().all(|&v| v == 1.0));
}

#[test]
fn test_unpacked_path_strides_and_ops() {
    let (m, n, k) = (13, 10, 22);
    for threads in [1, 3] {
        let ctx = Context::<f64>::builder()
            .kernel(KernelChoice::PortableTile { mr: 4, nr: 4 })
            .small_thresholds(SmallThresholds::always())
            .num_threads(threads)
            .build()
            .unwrap();
        for (seed, (opa, opb)) in [(Op::NoTrans, Op::NoTrans), (Op::Trans, Op::NoTrans), (Op::NoTrans, Op::Trans), (Op::Trans, Op::Trans)]
            .into_iter()
            .enumerate()
        {
            let (ar, ac) = opa.apply_dims(m, k);
            let (br, bc) = opb.apply_dims(k, n);
            let seed = 200 + 10 * threads as u64 + seed as u64;

            let layouts = (Layout::padded(ar, ac, ar + 3), Layout::row_major(br, bc).reversed(), Layout::col_major(m, n));
            check_against_reference(&ctx, opa, opb, m, n, k, 1.5, 0.0, layouts, seed);

            let layouts = (Layout::row_major(ar, ac).reversed(), Layout::padded(br, bc, br + 2), Layout::padded(m, n, m + 4).reversed());
            check_against_reference(&ctx, opa, opb, m, n, k, -0.5, 2.0, layouts, seed + 5);
        }
    }
}

#[test]
fn test_default_thresholds_agree_with_packed_path() {
    // Thin and tiny shapes under the default thresholds against the same
    // shapes forced through packing.
    let packed = Context::<f64>::builder()
        .small_thresholds(SmallThresholds::never())
        .build()
        .unwrap();
    let default = Context::<f64>::new();
    let mut rng = rng(211);
    for (m, n, k) in [(1, 300, 40), (250, 2, 33), (9, 7, 11), (3, 3, 500)] {
        assert!(default.small_thresholds().accepts(m, n, k), "{m}x{n}x{k}");
        let a: Vec<f64> = random_vec(&mut rng, m * k);
        let b: Vec<f64> = random_vec(&mut rng, k * n);
        let c0: Vec<f64> = random_vec(&mut rng, m * n);

        let mut results = Vec::new();
        for ctx in [&packed, &default] {
            let mut c = c0.clone();
            ctx.gemm(Op::NoTrans, Op::Trans, m, n, k, 0.75, &a, 1, m as isize, &b, 1, n as isize, -1.0, &mut c, n as isize, 1)
                .unwrap();
            results.push(c);
        }
        assert_gemm_close(&results[1], &results[0], &Layout::row_major(m, n), k, 2.0, &format!("{m}x{n}x{k}"));
    }
}

#[test]
fn test_one_thread_vs_many() {
    let mut rng = rng(71);
    let (m, n, k) = (211, 97, 130);
    let a: Vec<f64> = random_vec(&mut rng, m * k);
    let b: Vec<f64> = random_vec(&mut rng, k * n);
    let c0: Vec<f64> = random_vec(&mut rng, m * n);

    let mut results = Vec::new();
    for threads in [1, 2, 4] {
        let ctx = small_blocks::<f64>(threads);
        let mut c = c0.clone();
        ctx.gemm(Op::NoTrans, Op::NoTrans, m, n, k, 1.0, &a, 1, m as isize, &b, 1, k as isize, 0.5, &mut c, 1, m as isize)
            .unwrap();
        results.push(c);
    }

    for (threads, c) in [2, 4].iter().zip(&results[1..]) {
        for (idx, (x, y)) in results[0].iter().zip(c.iter()).enumerate() {
            assert!((x - y).abs() <= 1e-10, "{threads} threads: C[{idx}] = {y}, serial {x}");
        }
    }
}

#[test]
fn test_against_ndarray() {
    let mut rng = rng(81);
    let (m, n, k) = (48, 36, 52);
    let a = Array2::from_shape_vec((m, k), random_vec::<f64>(&mut rng, m * k)).unwrap();
    let b = Array2::from_shape_vec((k, n), random_vec::<f64>(&mut rng, k * n)).unwrap();
    let expected = a.dot(&b);

    let mut c = Array2::<f64>::zeros((m, n));
    let (a_s, b_s) = (a.as_slice().unwrap(), b.as_slice().unwrap());
    let c_s = c.as_slice_mut().unwrap();
    gemm(Op::NoTrans, Op::NoTrans, m, n, k, 1.0, a_s, k as isize, 1, b_s, n as isize, 1, 0.0, c_s, n as isize, 1)
        .unwrap();

    for ((i, j), v) in c.indexed_iter() {
        assert_abs_diff_eq!(*v, expected[[i, j]], epsilon = 1e-12);
    }
}

#[test]
fn test_multiply_flags_and_views() {
    let mut rng = rng(91);
    let (m, n, k) = (13, 11, 17);
    // A stored k x m (so op(A) = A^T), B stored n x k (op(B) = B^T).
    let a: Vec<f32> = random_vec(&mut rng, k * m);
    let b: Vec<f32> = random_vec(&mut rng, n * k);

    let mut c1 = vec![0.0f32; m * n];
    multiply(true, true, false, false, m, n, k, 1.0, &a, 1, k as isize, &b, 1, n as isize, 0.0, &mut c1, 1, m as isize)
        .unwrap();

    let mut c2 = vec![0.0f32; m * n];
    let av = MatrixView::col_major(&a, k, m).unwrap().t();
    let bv = MatrixView::col_major(&b, n, k).unwrap().t();
    let mut cv = MatrixViewMut::col_major(&mut c2, m, n).unwrap();
    Context::new().matmul(1.0, &av, &bv, 0.0, &mut cv).unwrap();

    for (idx, (x, y)) in c1.iter().zip(c2.iter()).enumerate() {
        assert!((x - y).abs() < 1e-5, "C[{idx}]: multiply {x}, matmul {y}");
    }

    let mut c3 = vec![0.0f32; m * n];
    unsafe {
        gemm_raw(Op::Trans, Op::Trans, m, n, k, 1.0, a.as_ptr(), 1, k as isize, b.as_ptr(), 1, n as isize, 0.0, c3.as_mut_ptr(), 1, m as isize)
            .unwrap();
    }
    assert_eq!(c1, c3);
}
