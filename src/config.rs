//! Explicit per-operation configuration and cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PdfError, PdfResult};

/// Default nesting limit for arrays and dictionaries
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Reader and writer settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum nesting of arrays and dictionaries accepted by the parser
    pub max_depth: usize,
    /// Rebuild the cross-reference table by scanning when the chain is broken
    pub recover_xref: bool,
    /// Decode independent streams concurrently right after loading
    pub parallel_decode: bool,
    /// Flate level used for streams re-encoded by the writer
    pub compression_level: u32,
    /// Flate-compress stream bodies replaced through the document API
    pub compress_new_streams: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            recover_xref: true,
            parallel_decode: false,
            compression_level: 6,
            compress_new_streams: true,
        }
    }
}

impl Config {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_recover_xref(mut self, recover: bool) -> Self {
        self.recover_xref = recover;
        self
    }

    pub fn with_parallel_decode(mut self, parallel: bool) -> Self {
        self.parallel_decode = parallel;
        self
    }

    /// Flate level, clamped to 0..=9
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn with_compress_new_streams(mut self, compress: bool) -> Self {
        self.compress_new_streams = compress;
        self
    }
}

/// Cloneable cancellation flag shared between a caller and a long traversal
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`PdfError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> PdfResult<()> {
        if self.is_cancelled() {
            Err(PdfError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Configuration plus cancellation, constructed once and passed down
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub config: Config,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing token so the caller can abort this operation
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = Config::default()
            .with_max_depth(8)
            .with_parallel_decode(true)
            .with_compression_level(42);

        assert_eq!(config.max_depth, 8);
        assert!(config.parallel_decode);
        assert_eq!(config.compression_level, 9);
        assert!(config.recover_xref);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = Context::default().with_cancellation(token.clone());
        assert!(ctx.cancel.check().is_ok());

        token.cancel();
        assert!(ctx.cancel.is_cancelled());
        assert!(matches!(ctx.cancel.check(), Err(PdfError::Cancelled)));
    }
}
