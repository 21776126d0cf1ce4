//! Engine configuration.
//!
//! A [`Context`] fixes everything a multiplication needs besides its
//! operands: the microkernel (chosen once, with runtime CPU feature
//! detection), the blocking parameters, the small-problem thresholds, the
//! fringe strategy and the thread pool. It is immutable after construction
//! and can be shared freely between threads.
//!
//! ```rust
//! use gemmly::{BlockingParams, Context, FringeStrategy, KernelChoice};
//!
//! let ctx = Context::<f64>::builder()
//!     .kernel(KernelChoice::Portable)
//!     .blocking(BlockingParams::new(64, 128, 512))
//!     .fringe(FringeStrategy::Scalar)
//!     .num_threads(2)
//!     .build()
//!     .unwrap();
//! assert_eq!(ctx.num_threads(), 2);
//! ```

use std::sync::Arc;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::element::Element;
use crate::error::{unsupported, Result};
use crate::fringe::FringeStrategy;
use crate::kernel::{self, KernelChoice, KernelInfo};
use crate::params::{BlockingParams, CacheSizes, SmallThresholds};

#[derive(Clone)]
enum Threading {
    /// Everything on the calling thread.
    Serial,
    /// Whatever rayon pool the caller runs in.
    Global,
    /// A pool owned by this context.
    Dedicated(Arc<ThreadPool>),
}

/// Immutable engine configuration for element type `T`.
#[derive(Clone)]
pub struct Context<T: Element> {
    kernel: KernelInfo<T>,
    blocking: BlockingParams,
    small: SmallThresholds,
    fringe: FringeStrategy,
    threading: Threading,
}

impl<T: Element> Context<T> {
    /// The default configuration: best kernel for the running CPU, blocking
    /// derived from the detected caches, padded fringe, rayon's global pool.
    pub fn new() -> Self {
        let kernel = kernel::auto::<T>();
        let blocking = default_blocking(&kernel);
        let small = SmallThresholds::for_tile(kernel.mr, kernel.nr);
        let ctx = Context {
            kernel,
            blocking,
            small,
            fringe: FringeStrategy::default(),
            threading: Threading::Global,
        };
        ctx.log_config();
        ctx
    }

    /// Starts a custom configuration.
    pub fn builder() -> ContextBuilder<T> {
        ContextBuilder::default()
    }

    /// The selected microkernel.
    pub fn kernel(&self) -> &KernelInfo<T> {
        &self.kernel
    }

    /// Blocking parameters; `mc` and `nc` are multiples of the tile shape.
    pub fn blocking(&self) -> BlockingParams {
        self.blocking
    }

    /// Sizes below which operands are read in place instead of packed.
    pub fn small_thresholds(&self) -> SmallThresholds {
        self.small
    }

    pub fn fringe(&self) -> FringeStrategy {
        self.fringe
    }

    /// Number of threads a call made now would use.
    pub fn num_threads(&self) -> usize {
        match &self.threading {
            Threading::Serial => 1,
            Threading::Global => rayon::current_num_threads(),
            Threading::Dedicated(pool) => pool.current_num_threads(),
        }
    }

    /// Runs `f` inside this context's thread pool.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.threading {
            Threading::Dedicated(pool) => pool.install(f),
            Threading::Serial | Threading::Global => f(),
        }
    }

    fn log_config(&self) {
        debug!(
            "{} context: kernel {} ({}x{}), mc={} kc={} nc={}, unpacked below {}x{} or {} multiply-adds, fringe {:?}, {} thread(s)",
            T::NAME,
            self.kernel.name,
            self.kernel.mr,
            self.kernel.nr,
            self.blocking.mc,
            self.blocking.kc,
            self.blocking.nc,
            self.small.m_below,
            self.small.n_below,
            self.small.volume,
            self.fringe,
            self.num_threads()
        );
    }
}

impl<T: Element> Default for Context<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> std::fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("kernel", &self.kernel)
            .field("blocking", &self.blocking)
            .field("small", &self.small)
            .field("fringe", &self.fringe)
            .field("threads", &self.num_threads())
            .finish()
    }
}

fn default_blocking<T: Element>(kernel: &KernelInfo<T>) -> BlockingParams {
    BlockingParams::for_kernel(
        std::mem::size_of::<T>(),
        kernel.mr,
        kernel.nr,
        CacheSizes::detect(),
    )
}

/// Builder for [`Context`].
#[derive(Debug)]
pub struct ContextBuilder<T: Element> {
    choice: KernelChoice,
    custom: Option<KernelInfo<T>>,
    blocking: Option<BlockingParams>,
    small: Option<SmallThresholds>,
    fringe: FringeStrategy,
    threads: Option<usize>,
}

impl<T: Element> Default for ContextBuilder<T> {
    fn default() -> Self {
        ContextBuilder {
            choice: KernelChoice::Auto,
            custom: None,
            blocking: None,
            small: None,
            fringe: FringeStrategy::default(),
            threads: None,
        }
    }
}

impl<T: Element> ContextBuilder<T> {
    /// Chooses among the built-in kernels.
    pub fn kernel(mut self, choice: KernelChoice) -> Self {
        self.choice = choice;
        self.custom = None;
        self
    }

    /// Uses a caller-provided kernel. Its tile must be non-empty and at most
    /// [`MAX_TILE_ELEMS`](crate::kernel::MAX_TILE_ELEMS) elements.
    pub fn custom_kernel(mut self, info: KernelInfo<T>) -> Self {
        self.custom = Some(info);
        self
    }

    /// Explicit blocking parameters; `mc` and `nc` are rounded up to tile
    /// multiples.
    pub fn blocking(mut self, params: BlockingParams) -> Self {
        self.blocking = Some(params);
        self
    }

    /// Overrides when problems skip packing; the default is
    /// [`SmallThresholds::for_tile`] of the selected kernel.
    pub fn small_thresholds(mut self, thresholds: SmallThresholds) -> Self {
        self.small = Some(thresholds);
        self
    }

    pub fn fringe(mut self, strategy: FringeStrategy) -> Self {
        self.fringe = strategy;
        self
    }

    /// Runs on a dedicated pool of `n` threads (`1` runs on the calling
    /// thread). Without this, calls use the ambient rayon pool.
    pub fn num_threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }

    pub fn build(self) -> Result<Context<T>> {
        let kernel = match self.custom {
            Some(info) => {
                kernel::validate(&info)?;
                info
            }
            None => kernel::select::<T>(self.choice)?,
        };

        let blocking = match self.blocking {
            Some(params) => params.fitted(kernel.mr, kernel.nr)?,
            None => default_blocking(&kernel),
        };

        let small = self
            .small
            .unwrap_or_else(|| SmallThresholds::for_tile(kernel.mr, kernel.nr));

        let threading = match self.threads {
            None => Threading::Global,
            Some(0) => return Err(unsupported("thread count must be at least 1")),
            Some(1) => Threading::Serial,
            Some(n) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("gemmly-{i}"))
                    .build()
                    .map_err(|e| unsupported(format!("cannot start {n} worker threads: {e}")))?;
                Threading::Dedicated(Arc::new(pool))
            }
        };

        let ctx = Context {
            kernel,
            blocking,
            small,
            fringe: self.fringe,
            threading,
        };
        ctx.log_config();
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GemmError;

    #[test]
    fn test_default_context_is_consistent() {
        let ctx = Context::<f32>::new();
        let k = ctx.kernel();
        let b = ctx.blocking();
        assert!(k.mr * k.nr <= crate::kernel::MAX_TILE_ELEMS);
        assert_eq!(b.mc % k.mr, 0);
        assert_eq!(b.nc % k.nr, 0);
        assert!(b.kc > 0);
        assert!(ctx.num_threads() >= 1);
    }

    #[test]
    fn test_builder_rounds_blocking() {
        let ctx = Context::<f64>::builder()
            .kernel(KernelChoice::PortableTile { mr: 4, nr: 4 })
            .blocking(BlockingParams::new(10, 20, 30))
            .build()
            .unwrap();
        assert_eq!(ctx.blocking(), BlockingParams::new(12, 20, 32));
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let err = Context::<f32>::builder().num_threads(0).build().unwrap_err();
        assert!(matches!(err, GemmError::UnsupportedConfiguration { .. }));
    }

    #[test]
    fn test_builder_rejects_zero_blocking() {
        let err = Context::<f32>::builder()
            .blocking(BlockingParams::new(8, 0, 8))
            .build()
            .unwrap_err();
        assert!(matches!(err, GemmError::UnsupportedConfiguration { .. }));
    }

    #[test]
    fn test_dedicated_pool_size() {
        let ctx = Context::<f32>::builder().num_threads(3).build().unwrap();
        assert_eq!(ctx.num_threads(), 3);
        let inside = ctx.install(rayon::current_num_threads);
        assert_eq!(inside, 3);
    }

    #[test]
    fn test_small_thresholds_follow_the_tile() {
        let ctx = Context::<f64>::builder()
            .kernel(KernelChoice::PortableTile { mr: 2, nr: 8 })
            .build()
            .unwrap();
        assert_eq!(ctx.small_thresholds(), SmallThresholds::for_tile(2, 8));

        let ctx = Context::<f64>::builder()
            .small_thresholds(SmallThresholds::never())
            .build()
            .unwrap();
        assert_eq!(ctx.small_thresholds(), SmallThresholds::never());
    }

    #[test]
    fn test_serial_context() {
        let ctx = Context::<f64>::builder()
            .num_threads(1)
            .fringe(FringeStrategy::Scalar)
            .build()
            .unwrap();
        assert_eq!(ctx.num_threads(), 1);
        assert_eq!(ctx.fringe(), FringeStrategy::Scalar);
    }
}
