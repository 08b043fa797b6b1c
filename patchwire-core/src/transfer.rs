//! Transfer Tables
//!
//! A transfer table is a sampled memoryless curve applied sample-by-sample
//! by a shaper. Table position `i` of `n` corresponds to the input value
//! `x = (i / n) * 2 - 1`, so the table spans `[-1, 1)`.
//!
//! The [`TransferRegistry`] maps each [`TransferMode`] to a curve function.
//! Tables it computes are saturated to `[-1, 1]`, with non-finite outputs
//! replaced by `0`.
//!
//! A [`TableHandle`] publishes the current table to the processing plane.
//! Replacing a table swaps one pointer; a shaper mid-block keeps reading the
//! table it loaded.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::Kernel;

/// The built-in saturation curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// `(1 + k)x / (1 + k|x|)` with `k = 10^(drive / 20)`.
    AnalogClip = 0,
    /// `x / (1 + |x|)`.
    SoftClip = 1,
    /// `x` clamped to `[-1, 1]`.
    HardClip = 2,
    /// `|x|`.
    Rectifier = 3,
    /// `sin(x)`.
    SineFold = 4,
    /// `x² · sign(x)`.
    WaveShaping = 5,
}

impl TransferMode {
    pub const ALL: [TransferMode; 6] = [
        TransferMode::AnalogClip,
        TransferMode::SoftClip,
        TransferMode::HardClip,
        TransferMode::Rectifier,
        TransferMode::SineFold,
        TransferMode::WaveShaping,
    ];

    /// Map a mode index to a mode. Unknown indices fall back to `AnalogClip`.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => TransferMode::SoftClip,
            2 => TransferMode::HardClip,
            3 => TransferMode::Rectifier,
            4 => TransferMode::SineFold,
            5 => TransferMode::WaveShaping,
            _ => TransferMode::AnalogClip,
        }
    }

    /// Map a control value to a mode, rounding to the nearest index.
    pub fn from_f32(value: f32) -> Self {
        if value.is_finite() {
            Self::from_index(value.round() as i64)
        } else {
            TransferMode::AnalogClip
        }
    }

    pub fn index(&self) -> i64 {
        *self as i64
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferMode::AnalogClip => "Analog Clip",
            TransferMode::SoftClip => "Soft Clip",
            TransferMode::HardClip => "Hard Clip",
            TransferMode::Rectifier => "Rectifier",
            TransferMode::SineFold => "Sine Fold",
            TransferMode::WaveShaping => "Wave Shaping",
        }
    }

    /// Whether the curve depends on [`TransferParams::drive`].
    pub fn uses_drive(&self) -> bool {
        matches!(self, TransferMode::AnalogClip)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs to a curve besides the sample itself.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferParams {
    /// Drive in decibels.
    pub drive: f32,
}

impl TransferParams {
    pub fn with_drive(drive: f32) -> Self {
        Self { drive }
    }
}

/// A curve: maps `x` in `[-1, 1)` to an output sample.
pub type TransferFn = Arc<dyn Fn(f64, &TransferParams) -> f64 + Send + Sync>;

fn analog_clip(x: f64, params: &TransferParams) -> f64 {
    let k = 10f64.powf(f64::from(params.drive) / 20.0);
    ((1.0 + k) * x) / (1.0 + k * x.abs())
}

fn soft_clip(x: f64, _: &TransferParams) -> f64 {
    x / (1.0 + x.abs())
}

fn hard_clip(x: f64, _: &TransferParams) -> f64 {
    x.clamp(-1.0, 1.0)
}

fn rectifier(x: f64, _: &TransferParams) -> f64 {
    x.abs()
}

fn sine_fold(x: f64, _: &TransferParams) -> f64 {
    x.sin()
}

fn wave_shaping(x: f64, _: &TransferParams) -> f64 {
    // `signum` maps 0.0 to 1.0; the product is still 0.
    x * x * x.signum()
}

/// Curve functions keyed by mode.
pub struct TransferRegistry {
    functions: DashMap<TransferMode, TransferFn>,
}

impl TransferRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// A registry holding the six built-in curves.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(TransferMode::AnalogClip, analog_clip);
        registry.register(TransferMode::SoftClip, soft_clip);
        registry.register(TransferMode::HardClip, hard_clip);
        registry.register(TransferMode::Rectifier, rectifier);
        registry.register(TransferMode::SineFold, sine_fold);
        registry.register(TransferMode::WaveShaping, wave_shaping);
        registry
    }

    /// Install or replace the curve for `mode`.
    pub fn register<F>(&self, mode: TransferMode, function: F)
    where
        F: Fn(f64, &TransferParams) -> f64 + Send + Sync + 'static,
    {
        self.functions.insert(mode, Arc::new(function));
    }

    pub fn contains(&self, mode: TransferMode) -> bool {
        self.functions.contains_key(&mode)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Sample the curve for `mode` into a table of `len` entries.
    pub fn compute_table(
        &self,
        mode: TransferMode,
        params: &TransferParams,
        len: usize,
    ) -> Result<Vec<f32>> {
        // Clone out of the map so the shard lock is not held while sampling.
        let function = self
            .functions
            .get(&mode)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::UnknownTransfer(mode.label().to_string()))?;

        let n = len as f64;
        let table = (0..len)
            .map(|i| {
                let x = (i as f64 / n) * 2.0 - 1.0;
                saturate(function(x, params))
            })
            .collect();

        debug!(%mode, drive = params.drive, len, "computed transfer table");
        Ok(table)
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut modes: Vec<TransferMode> = self.functions.iter().map(|e| *e.key()).collect();
        modes.sort_by_key(TransferMode::index);
        f.debug_struct("TransferRegistry").field("modes", &modes).finish()
    }
}

fn saturate(y: f64) -> f32 {
    if y.is_finite() {
        y.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// The published table a shaper reads.
#[derive(Clone)]
pub struct TableHandle {
    current: Arc<ArcSwap<Vec<f32>>>,
}

impl TableHandle {
    pub fn new(table: Vec<f32>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// Replace the table as a single step.
    pub fn apply(&self, table: Vec<f32>) {
        self.current.store(Arc::new(table));
    }

    /// The table currently published.
    pub fn load(&self) -> Arc<Vec<f32>> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl Default for TableHandle {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle").field("len", &self.len()).finish()
    }
}

/// Look `x` up in `table` with linear interpolation.
///
/// An empty table passes `x` through.
pub fn lookup(table: &[f32], x: f32) -> f32 {
    match table.len() {
        0 => x,
        1 => table[0],
        len => {
            let last = len - 1;
            let position = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f32;
            let index = (position.floor() as usize).min(last);
            if index == last {
                return table[last];
            }
            let frac = position - index as f32;
            table[index] + (table[index + 1] - table[index]) * frac
        }
    }
}

/// Applies the published transfer table to each sample.
#[derive(Debug)]
pub struct ShaperKernel {
    table: TableHandle,
}

impl ShaperKernel {
    pub fn new(table: TableHandle) -> Self {
        Self { table }
    }
}

impl Kernel for ShaperKernel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let table = self.table.load();
        for (out, sample) in output.iter_mut().zip(input) {
            *out = lookup(&table, *sample);
        }
    }
}
