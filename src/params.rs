//! Cache-blocking parameters.
//!
//! The three blocking sizes are derived analytically from the cache
//! hierarchy:
//!
//! - `kc`: one `mr × kc` panel of A plus one `kc × nr` panel of B fit in L1.
//! - `mc`: an `mc × kc` block of A fits in L2 next to one B panel.
//! - `nc`: a `kc × nc` block of B fits in L3.
//!
//! Cache sizes are read from sysfs on Linux and detected once per process.

use std::cmp::{max, min};
use std::sync::OnceLock;

use log::{debug, warn};

use crate::error::{unsupported, Result};

/// Upper bound on the contraction block.
pub const KC_MAX: usize = 384;

/// Upper bound on the row block.
pub const MC_MAX: usize = 960;

/// Upper bound on the column block.
pub const NC_MAX: usize = 8192;

/// Lower bound on the contraction block produced by [`BlockingParams::for_kernel`].
const KC_MIN: usize = 16;

/// Fallback cache sizes when detection fails: 32 KiB L1D, 512 KiB L2, 8 MiB L3.
const FALLBACK: CacheSizes = CacheSizes {
    l1d: 32 * 1024,
    l2: 512 * 1024,
    l3: 8 * 1024 * 1024,
};

/// Data cache sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    /// Level-1 data cache.
    pub l1d: usize,
    /// Level-2 cache.
    pub l2: usize,
    /// Level-3 cache.
    pub l3: usize,
}

impl CacheSizes {
    /// Cache sizes of the running machine, detected on first call.
    pub fn detect() -> CacheSizes {
        static SIZES: OnceLock<CacheSizes> = OnceLock::new();
        *SIZES.get_or_init(|| match detect_sysfs() {
            Some(sizes) => {
                debug!(
                    "detected caches: L1D {} KiB, L2 {} KiB, L3 {} KiB",
                    sizes.l1d / 1024,
                    sizes.l2 / 1024,
                    sizes.l3 / 1024
                );
                sizes
            }
            None => {
                warn!("cache size detection failed, using 32K/512K/8M defaults");
                FALLBACK
            }
        })
    }
}

impl Default for CacheSizes {
    fn default() -> Self {
        FALLBACK
    }
}

#[cfg(target_os = "linux")]
fn detect_sysfs() -> Option<CacheSizes> {
    let mut l1d = None;
    let mut l2 = None;
    let mut l3 = None;

    for idx in 0..8 {
        let base = format!("/sys/devices/system/cpu/cpu0/cache/index{idx}");
        let Ok(level) = std::fs::read_to_string(format!("{base}/level")) else {
            continue;
        };
        let Ok(kind) = std::fs::read_to_string(format!("{base}/type")) else {
            continue;
        };
        let Ok(size) = std::fs::read_to_string(format!("{base}/size")) else {
            continue;
        };
        let Some(size) = parse_size(size.trim()) else {
            continue;
        };

        match (level.trim(), kind.trim()) {
            ("1", "Data") => l1d = Some(size),
            ("2", "Unified") | ("2", "Data") => l2 = Some(size),
            ("3", "Unified") => l3 = Some(size),
            _ => {}
        }
    }

    match (l1d, l2) {
        (Some(l1d), Some(l2)) => Some(CacheSizes {
            l1d,
            l2,
            l3: l3.unwrap_or(FALLBACK.l3),
        }),
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn detect_sysfs() -> Option<CacheSizes> {
    None
}

/// Parses sysfs sizes such as `48K`, `2048K` or `32M`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_size(s: &str) -> Option<usize> {
    if let Some(kb) = s.strip_suffix('K') {
        kb.parse::<usize>().ok().map(|v| v * 1024)
    } else if let Some(mb) = s.strip_suffix('M') {
        mb.parse::<usize>().ok().map(|v| v * 1024 * 1024)
    } else {
        s.parse().ok()
    }
}

/// Row, contraction and column block sizes used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingParams {
    /// Rows of A packed per block (multiple of `mr`).
    pub mc: usize,
    /// Depth of each packed panel.
    pub kc: usize,
    /// Columns of B packed per block (multiple of `nr`).
    pub nc: usize,
}

impl BlockingParams {
    /// Explicit block sizes. They are checked and rounded to tile multiples
    /// when the [`Context`](crate::Context) is built.
    pub fn new(mc: usize, kc: usize, nc: usize) -> Self {
        BlockingParams { mc, kc, nc }
    }

    /// Block sizes for a kernel with an `mr × nr` tile over elements of
    /// `elem_size` bytes.
    pub fn for_kernel(elem_size: usize, mr: usize, nr: usize, caches: CacheSizes) -> Self {
        let elem_size = max(elem_size, 1);
        let mr = max(mr, 1);
        let nr = max(nr, 1);

        // L1: A panel (mr x kc) + B panel (kc x nr).
        let kc = (caches.l1d / elem_size) / (mr + nr);
        let kc = kc.clamp(KC_MIN, KC_MAX);

        // L2: A block (mc x kc) next to one B panel.
        let l2_elems = caches.l2 / elem_size;
        let mc_raw = l2_elems.saturating_sub(kc * nr) / kc;
        let mc = min(max((mc_raw / mr) * mr, mr), round_down(MC_MAX, mr).max(mr));

        // L3: B block (kc x nc).
        let nc_raw = (caches.l3 / elem_size) / kc;
        let nc = min(max((nc_raw / nr) * nr, nr), round_down(NC_MAX, nr).max(nr));

        BlockingParams { mc, kc, nc }
    }

    /// Validates the parameters against a tile shape, rounding `mc` and `nc`
    /// up to multiples of `mr` and `nr`.
    pub(crate) fn fitted(self, mr: usize, nr: usize) -> Result<Self> {
        if self.mc == 0 || self.kc == 0 || self.nc == 0 {
            return Err(unsupported(format!(
                "blocking parameters must be non-zero (mc={}, kc={}, nc={})",
                self.mc, self.kc, self.nc
            )));
        }

        let mc = round_up(self.mc, mr);
        let nc = round_up(self.nc, nr);
        if mc != self.mc || nc != self.nc {
            warn!(
                "blocking mc={} nc={} rounded to mc={} nc={} for a {}x{} tile",
                self.mc, self.nc, mc, nc, mr, nr
            );
        }

        Ok(BlockingParams { mc, kc: self.kc, nc })
    }
}

/// Default `m · n · k` volume below which operands are read in place.
pub const SMALL_VOLUME: usize = 16 * 16 * 16;

/// Problem sizes for which packing costs more than it saves.
///
/// A problem is computed straight from the strided operands, without
/// packing, when `m < m_below`, `n < n_below` or `m · n · k <= volume`.
/// Packed operands always take the blocked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallThresholds {
    /// Row count below which the unpacked path is taken.
    pub m_below: usize,
    /// Column count below which the unpacked path is taken.
    pub n_below: usize,
    /// Largest `m · n · k` taken by the unpacked path.
    pub volume: usize,
}

impl SmallThresholds {
    /// Outputs thinner than one `mr × nr` tile, or at most
    /// [`SMALL_VOLUME`] multiply-adds.
    pub fn for_tile(mr: usize, nr: usize) -> Self {
        SmallThresholds {
            m_below: mr,
            n_below: nr,
            volume: SMALL_VOLUME,
        }
    }

    /// Always pack.
    pub fn never() -> Self {
        SmallThresholds {
            m_below: 0,
            n_below: 0,
            volume: 0,
        }
    }

    /// Never pack operands that are not already packed.
    pub fn always() -> Self {
        SmallThresholds {
            m_below: usize::MAX,
            n_below: usize::MAX,
            volume: usize::MAX,
        }
    }

    /// Whether an `m × n × k` problem (all non-zero) skips packing.
    pub fn accepts(&self, m: usize, n: usize, k: usize) -> bool {
        m < self.m_below || n < self.n_below || m.saturating_mul(n).saturating_mul(k) <= self.volume
    }
}

/// Rounds `x` up to a multiple of `m`.
#[inline(always)]
pub(crate) fn round_up(x: usize, m: usize) -> usize {
    x.div_ceil(m) * m
}

#[inline(always)]
fn round_down(x: usize, m: usize) -> usize {
    (x / m) * m
}
