//! Sub-node Collections
//!
//! A [`SubNodeCollection`] is an ordered list of optional values in which
//! every occupied slot owns one live child node. Mutations are incremental:
//! only the slot that changes has its child created or disposed, and
//! removing a slot shifts later slots down without touching their children.
//!
//! # Attachment
//!
//! A collection is either attached (children are live) or detached (values
//! are kept, no children exist). While attached, the number of live children
//! equals the number of occupied slots. Collections start attached, so a
//! child and its ports exist from the moment its slot is filled until the
//! slot is emptied, removed, or the collection is dropped.

use std::fmt;

use tracing::{debug, trace};

use crate::context::AudioContext;
use crate::dispose::DisposalReport;
use crate::error::{GraphError, Result};
use crate::graph::{Node, NodeHandle};

/// Builds the child node for a slot value.
pub type SpawnFn<T> = Box<dyn FnMut(&T) -> Result<Box<dyn Node>> + Send>;

/// What a mutation did, delivered to observers after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    Appended(usize),
    Replaced(usize),
    Removed(usize),
}

struct Slot<T> {
    value: Option<T>,
    child: Option<NodeHandle>,
}

pub struct SubNodeCollection<T> {
    label: String,
    ctx: AudioContext,
    spawn: SpawnFn<T>,
    slots: Vec<Slot<T>>,
    attached: bool,
    observers: Vec<Box<dyn Fn(&SlotChange) + Send>>,
}

impl<T> SubNodeCollection<T> {
    /// An attached, empty collection.
    pub fn new<F>(label: impl Into<String>, ctx: &AudioContext, spawn: F) -> Self
    where
        F: FnMut(&T) -> Result<Box<dyn Node>> + Send + 'static,
    {
        let mut collection = Self::detached(label, ctx, spawn);
        collection.attached = true;
        collection
    }

    /// A detached, empty collection.
    pub fn detached<F>(label: impl Into<String>, ctx: &AudioContext, spawn: F) -> Self
    where
        F: FnMut(&T) -> Result<Box<dyn Node>> + Send + 'static,
    {
        Self {
            label: label.into(),
            ctx: ctx.clone(),
            spawn: Box::new(spawn),
            slots: Vec::new(),
            attached: false,
            observers: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Number of live children.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.child.is_some()).count()
    }

    /// Number of slots holding a value.
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.value.as_ref()
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.slots.iter().map(|slot| slot.value.as_ref())
    }

    pub fn child(&self, index: usize) -> Option<&NodeHandle> {
        self.slots.get(index)?.child.as_ref()
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut NodeHandle> {
        self.slots.get_mut(index)?.child.as_mut()
    }

    /// Index of the first slot whose value matches.
    pub fn position<P>(&self, mut predicate: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.slots
            .iter()
            .position(|slot| slot.value.as_ref().is_some_and(&mut predicate))
    }

    /// Index of the first empty slot.
    pub fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.value.is_none())
    }

    /// Register an observer called after every mutation.
    pub fn on_change<F>(&mut self, observer: F)
    where
        F: Fn(&SlotChange) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Add a slot at the end. If the value is present and the collection is
    /// attached, its child is created and connected first; on failure the
    /// collection is unchanged.
    pub fn append(&mut self, value: Option<T>) -> Result<usize> {
        let index = self.slots.len();
        let child = match (&value, self.attached) {
            (Some(value), true) => Some(self.start_child(value)?),
            _ => None,
        };
        self.slots.push(Slot { value, child });
        trace!(collection = %self.label, index, "slot appended");
        self.notify(SlotChange::Appended(index));
        Ok(index)
    }

    /// Replace the value at `index`, disposing only that slot's child.
    ///
    /// Returns the previous value. The replacement child is created and
    /// connected before the old one is disposed; if either step fails the
    /// collection is unchanged and the error is returned.
    pub fn replace_at(&mut self, index: usize, value: Option<T>) -> Result<Option<T>> {
        self.check_index(index)?;

        let fresh = match (&value, self.attached) {
            (Some(value), true) => Some(self.start_child(value).map_err(|error| {
                debug!(collection = %self.label, index, %error, "replacement child not started");
                error
            })?),
            _ => None,
        };

        let slot = &mut self.slots[index];
        let previous = std::mem::replace(&mut slot.value, value);
        if let Some(old) = std::mem::replace(&mut slot.child, fresh) {
            release(old);
        }
        trace!(collection = %self.label, index, "slot replaced");
        self.notify(SlotChange::Replaced(index));
        Ok(previous)
    }

    /// Remove the slot at `index`. Later slots shift down one position and
    /// keep their children.
    pub fn remove_at(&mut self, index: usize) -> Result<Option<T>> {
        self.check_index(index)?;
        let slot = self.slots.remove(index);
        if let Some(child) = slot.child {
            release(child);
        }
        trace!(collection = %self.label, index, "slot removed");
        self.notify(SlotChange::Removed(index));
        Ok(slot.value)
    }

    /// Create and connect a child for every occupied slot.
    ///
    /// All or nothing: if any child fails, the ones already created are
    /// released and the collection stays detached.
    pub fn attach(&mut self) -> Result<()> {
        if self.attached {
            return Ok(());
        }

        let mut started = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(value) = slot.value.as_ref() else {
                continue;
            };
            let mut handle = match spawn_child(&mut self.spawn, &self.label, value) {
                Ok(handle) => handle,
                Err(error) => {
                    started.into_iter().for_each(|(_, handle)| release(handle));
                    return Err(error);
                }
            };
            if let Err(error) = handle.connect(&self.ctx) {
                started.into_iter().for_each(|(_, handle)| release(handle));
                return Err(error);
            }
            started.push((index, handle));
        }

        let count = started.len();
        for (index, handle) in started {
            self.slots[index].child = Some(handle);
        }
        self.attached = true;
        debug!(collection = %self.label, children = count, "collection attached");
        Ok(())
    }

    /// Dispose every child, keeping the values.
    pub fn detach(&mut self) -> DisposalReport {
        let report = self.detach_children();
        if self.attached {
            debug!(collection = %self.label, completed = report.completed, "collection detached");
        }
        self.attached = false;
        report
    }

    /// Remove every slot, disposing every child.
    pub fn clear(&mut self) -> DisposalReport {
        let report = self.detach_children();
        while !self.slots.is_empty() {
            let index = self.slots.len() - 1;
            self.slots.pop();
            self.notify(SlotChange::Removed(index));
        }
        report
    }

    fn detach_children(&mut self) -> DisposalReport {
        let mut report = DisposalReport::default();
        for slot in &mut self.slots {
            if let Some(mut child) = slot.child.take() {
                report.merge(child.disconnect());
            }
        }
        report
    }

    fn start_child(&mut self, value: &T) -> Result<NodeHandle> {
        let mut handle = spawn_child(&mut self.spawn, &self.label, value)?;
        handle.connect(&self.ctx)?;
        Ok(handle)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.slots.len() {
            Ok(())
        } else {
            Err(GraphError::SlotOutOfRange {
                index,
                len: self.slots.len(),
            })
        }
    }

    fn notify(&self, change: SlotChange) {
        for observer in &self.observers {
            observer(&change);
        }
    }
}

fn spawn_child<T>(spawn: &mut SpawnFn<T>, label: &str, value: &T) -> Result<NodeHandle> {
    let node = spawn(value)?;
    Ok(NodeHandle::new(node, label))
}

fn release(mut child: NodeHandle) {
    // Failures are logged by the handle; teardown continues regardless.
    child.disconnect();
    drop(child);
}

impl<T> Drop for SubNodeCollection<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: fmt::Debug> fmt::Debug for SubNodeCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubNodeCollection")
            .field("label", &self.label)
            .field("values", &self.values().collect::<Vec<_>>())
            .field("live", &self.live_count())
            .field("attached", &self.attached)
            .finish()
    }
}
