//! Signal Units
//!
//! A [`SignalUnit`] is one processing stage on the signal plane: a kernel plus
//! the list of upstream units feeding it. Rendering is pull-based. Pulling a
//! block from a unit pulls the same block from every upstream unit, sums them
//! into the kernel's input, and runs the kernel.
//!
//! # Publication
//!
//! The upstream list is an `ArcSwap<Vec<_>>`. Wiring and unwiring build a new
//! list and swap it in, so a render in flight keeps iterating the list it
//! loaded and never observes a half-edited one.
//!
//! # Block Cache
//!
//! Each unit caches the last block it produced, keyed by block number, so a
//! unit feeding several others is processed once per block. A unit that is
//! pulled again while it is still rendering (a feedback loop) contributes
//! silence for that pull.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::trace;

use super::AudioParam;
use crate::dispose::Disposable;
use crate::error::{GraphError, Result};

/// Per-block sample processing.
pub trait Kernel: Send {
    /// `input` holds the summed upstream signal; `output` has the same length.
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Clear internal state.
    fn reset(&mut self) {}
}

/// Copies its input. Used as a merge point.
#[derive(Debug, Default)]
pub struct PassKernel;

impl Kernel for PassKernel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        output.copy_from_slice(input);
    }
}

/// Multiplies its input by a parameter.
#[derive(Debug)]
pub struct GainKernel {
    gain: AudioParam,
}

impl GainKernel {
    pub fn new(gain: AudioParam) -> Self {
        Self { gain }
    }
}

impl Kernel for GainKernel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let gain = self.gain.get();
        for (out, sample) in output.iter_mut().zip(input) {
            *out = sample * gain;
        }
    }
}

/// Emits a parameter's value, ignoring its input.
#[derive(Debug)]
pub struct ConstantKernel {
    level: AudioParam,
}

impl ConstantKernel {
    pub fn new(level: AudioParam) -> Self {
        Self { level }
    }
}

impl Kernel for ConstantKernel {
    fn process(&mut self, _input: &[f32], output: &mut [f32]) {
        output.fill(self.level.get());
    }
}

/// Identifies one pipe between two units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct Upstream {
    link: LinkId,
    unit: SignalUnit,
}

struct UnitState {
    kernel: Box<dyn Kernel>,
    block: Option<u64>,
    input: Vec<f32>,
    output: Vec<f32>,
}

struct UnitInner {
    label: String,
    inputs: ArcSwap<Vec<Upstream>>,
    state: Mutex<UnitState>,
}

/// A processing stage with a kernel and published upstream links.
#[derive(Clone)]
pub struct SignalUnit {
    inner: Arc<UnitInner>,
}

impl SignalUnit {
    pub fn new(label: impl Into<String>, kernel: impl Kernel + 'static) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                label: label.into(),
                inputs: ArcSwap::from_pointee(Vec::new()),
                state: Mutex::new(UnitState {
                    kernel: Box::new(kernel),
                    block: None,
                    input: Vec::new(),
                    output: Vec::new(),
                }),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn same_as(&self, other: &SignalUnit) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of units currently feeding this one.
    pub fn input_count(&self) -> usize {
        self.inner.inputs.load().len()
    }

    /// Whether `upstream` currently feeds this unit.
    pub fn is_fed_by(&self, upstream: &SignalUnit) -> bool {
        self.inner
            .inputs
            .load()
            .iter()
            .any(|entry| entry.unit.same_as(upstream))
    }

    /// Render one block. Results are cached per block number.
    pub fn render(&self, block: u64, frames: usize) -> Vec<f32> {
        let Some(mut state) = self.inner.state.try_lock() else {
            return vec![0.0; frames];
        };
        if state.block == Some(block) && state.output.len() == frames {
            return state.output.clone();
        }

        let inputs = self.inner.inputs.load();
        let state = &mut *state;
        state.input.clear();
        state.input.resize(frames, 0.0);
        for upstream in inputs.iter() {
            let samples = upstream.unit.render(block, frames);
            for (acc, sample) in state.input.iter_mut().zip(samples) {
                *acc += sample;
            }
        }

        state.output.clear();
        state.output.resize(frames, 0.0);
        state.kernel.process(&state.input, &mut state.output);
        state.block = Some(block);
        state.output.clone()
    }

    /// Clear the kernel state and the block cache.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.kernel.reset();
        state.block = None;
    }

    fn downgrade(&self) -> Weak<UnitInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for SignalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalUnit")
            .field("label", &self.label())
            .field("inputs", &self.input_count())
            .finish()
    }
}

/// Wire `from` into `to`. Samples flow until the returned pipe is
/// disconnected or dropped.
pub fn pipe(from: &SignalUnit, to: &SignalUnit) -> Result<Pipe> {
    if to.is_fed_by(from) {
        return Err(GraphError::DuplicateConnection {
            from: from.label().to_string(),
            to: to.label().to_string(),
        });
    }

    let link = LinkId::next();
    let entry = Upstream {
        link,
        unit: from.clone(),
    };
    to.inner.inputs.rcu(|current| {
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(entry.clone());
        next
    });
    trace!(from = %from.label(), to = %to.label(), "piped");

    Ok(Pipe {
        link,
        to: Some(to.downgrade()),
    })
}

/// A live link between two units. Returned by [`pipe`].
#[must_use = "dropping a Pipe disconnects it immediately"]
pub struct Pipe {
    link: LinkId,
    to: Option<Weak<UnitInner>>,
}

impl Pipe {
    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.to.is_some()
    }

    /// Remove the link. Returns `false` if it was already removed.
    pub fn disconnect(&mut self) -> bool {
        let Some(to) = self.to.take() else {
            return false;
        };
        if let Some(inner) = to.upgrade() {
            let link = self.link;
            inner.inputs.rcu(|current| {
                current
                    .iter()
                    .filter(|entry| entry.link != link)
                    .cloned()
                    .collect::<Vec<_>>()
            });
            trace!(to = %inner.label, "unpiped");
        }
        true
    }
}

impl Disposable for Pipe {
    fn dispose(&mut self) -> Result<()> {
        self.disconnect();
        Ok(())
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("link", &self.link)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(label: &str, level: f32) -> (SignalUnit, AudioParam) {
        let param = AudioParam::new(label, level);
        (SignalUnit::new(label, ConstantKernel::new(param.clone())), param)
    }

    #[test]
    fn pipe_carries_samples() {
        let (source, _) = constant("src", 0.5);
        let gain = AudioParam::new("gain", 2.0);
        let amp = SignalUnit::new("amp", GainKernel::new(gain));

        let _pipe = pipe(&source, &amp).unwrap();
        assert_eq!(amp.render(1, 4), vec![1.0; 4]);
    }

    #[test]
    fn inputs_are_summed() {
        let (a, _) = constant("a", 0.25);
        let (b, _) = constant("b", 0.5);
        let merge = SignalUnit::new("merge", PassKernel);

        let _pa = pipe(&a, &merge).unwrap();
        let _pb = pipe(&b, &merge).unwrap();
        assert_eq!(merge.render(1, 2), vec![0.75; 2]);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (source, _) = constant("src", 1.0);
        let sink = SignalUnit::new("sink", PassKernel);

        let mut link = pipe(&source, &sink).unwrap();
        assert!(link.disconnect());
        assert!(!link.disconnect());
        assert_eq!(sink.input_count(), 0);
        assert_eq!(sink.render(1, 3), vec![0.0; 3]);
    }

    #[test]
    fn duplicate_pipe_is_rejected() {
        let (source, _) = constant("src", 1.0);
        let sink = SignalUnit::new("sink", PassKernel);

        let _first = pipe(&source, &sink).unwrap();
        assert!(matches!(
            pipe(&source, &sink),
            Err(GraphError::DuplicateConnection { .. })
        ));
        assert_eq!(sink.input_count(), 1);
    }

    #[test]
    fn dropping_pipe_disconnects() {
        let (source, _) = constant("src", 1.0);
        let sink = SignalUnit::new("sink", PassKernel);
        {
            let _link = pipe(&source, &sink).unwrap();
            assert_eq!(sink.input_count(), 1);
        }
        assert_eq!(sink.input_count(), 0);
    }

    #[test]
    fn block_cache_reflects_parameter_changes_between_blocks() {
        let (source, level) = constant("src", 1.0);
        assert_eq!(source.render(1, 2), vec![1.0; 2]);
        level.set(0.5);
        // Same block: cached.
        assert_eq!(source.render(1, 2), vec![1.0; 2]);
        assert_eq!(source.render(2, 2), vec![0.5; 2]);
    }

    #[test]
    fn feedback_loop_renders_silence_for_reentry() {
        let a = SignalUnit::new("a", PassKernel);
        let b = SignalUnit::new("b", PassKernel);
        let mut ab = pipe(&a, &b).unwrap();
        let mut ba = pipe(&b, &a).unwrap();

        assert_eq!(b.render(1, 2), vec![0.0; 2]);

        ab.disconnect();
        ba.disconnect();
    }
}
