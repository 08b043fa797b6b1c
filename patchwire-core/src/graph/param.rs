//! Native processing parameters.
//!
//! An [`AudioParam`] is the value a kernel reads while producing samples
//! (a gain factor, a constant level). The control plane writes it, the
//! processing plane reads it, and the value lives in an `AtomicU32` holding
//! the `f32` bits, so neither side ever waits on the other.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{GraphError, Result};
use crate::reactive::SubscriberId;

struct ParamInner {
    name: String,
    bits: AtomicU32,
    driver: Mutex<Option<SubscriberId>>,
}

/// A lock-free scalar read by the processing plane.
#[derive(Clone)]
pub struct AudioParam {
    inner: Arc<ParamInner>,
}

impl AudioParam {
    pub fn new(name: impl Into<String>, initial: f32) -> Self {
        Self {
            inner: Arc::new(ParamInner {
                name: name.into(),
                bits: AtomicU32::new(initial.to_bits()),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.inner.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.inner.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Whether a binding currently drives this parameter.
    pub fn is_driven(&self) -> bool {
        self.inner.driver.lock().is_some()
    }

    pub(crate) fn claim_driver(&self, binding: SubscriberId) -> Result<()> {
        let mut driver = self.inner.driver.lock();
        if driver.is_some() {
            return Err(GraphError::AlreadyDriven {
                target: self.name().to_string(),
            });
        }
        *driver = Some(binding);
        Ok(())
    }

    pub(crate) fn release_driver(&self, binding: SubscriberId) {
        let mut driver = self.inner.driver.lock();
        if *driver == Some(binding) {
            *driver = None;
        }
    }

    /// Whether two handles refer to the same parameter.
    pub fn same_as(&self, other: &AudioParam) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AudioParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioParam")
            .field("name", &self.name())
            .field("value", &self.get())
            .field("driven", &self.is_driven())
            .finish()
    }
}
