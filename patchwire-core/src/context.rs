//! The audio context handed to every factory and connect hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::transfer::TransferRegistry;

/// Shared engine services. Clones share the registry, the bus and the clock.
#[derive(Debug, Clone)]
pub struct AudioContext {
    config: Arc<EngineConfig>,
    transfer: Arc<TransferRegistry>,
    events: EventBus,
    clock: Arc<AtomicU64>,
}

impl AudioContext {
    /// Validate `config` and build a context with the built-in transfer curves.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(TransferRegistry::with_builtins()))
    }

    pub fn with_registry(config: EngineConfig, transfer: Arc<TransferRegistry>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transfer,
            events: EventBus::new(),
            clock: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn table_len(&self) -> usize {
        self.config.table_len
    }

    pub fn transfer(&self) -> &Arc<TransferRegistry> {
        &self.transfer
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Advance the block clock and return the new block number.
    pub fn next_block(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_block(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }
}

impl Default for AudioContext {
    fn default() -> Self {
        Self {
            config: Arc::new(EngineConfig::default()),
            transfer: Arc::new(TransferRegistry::with_builtins()),
            events: EventBus::new(),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_shared_between_clones() {
        let ctx = AudioContext::default();
        let copy = ctx.clone();
        assert_eq!(ctx.next_block(), 1);
        assert_eq!(copy.next_block(), 2);
        assert_eq!(ctx.current_block(), 2);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig {
            block_size: 0,
            ..EngineConfig::default()
        };
        assert!(AudioContext::new(config).is_err());
    }
}
