//! Core engine: the filter, match, price, negotiate and record pipeline.

pub mod filter;
pub mod ledger;
pub mod matcher;
pub mod negotiator;
pub mod orchestrator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop signal, checked after every suspension point.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct FatalFlag(Arc<AtomicBool>);

impl FatalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
