//! Ports
//!
//! A [`Port`] is a typed, directed connection point exposed by a node. Signal
//! ports front a [`SignalUnit`]; control ports front a [`ControlCell`].
//!
//! Ports remember the connections that touch them (weakly) so that tearing
//! a node down can sever every link it still has.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::connection::{Connection, ConnectionId, ConnectionInner};
use super::unit::SignalUnit;
use crate::reactive::ControlCell;

/// What a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// Sample-rate audio.
    Signal,
    /// Scalar control values.
    Control,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Signal => f.write_str("signal"),
            PortKind::Control => f.write_str("control"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(u64);

impl PortId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The processing object behind a port.
#[derive(Clone, Debug)]
pub enum Endpoint {
    Signal(SignalUnit),
    Control(ControlCell),
}

struct PortInner {
    id: PortId,
    name: String,
    direction: PortDirection,
    endpoint: Endpoint,
    links: Arc<Links>,
}

type Links = Mutex<IndexMap<ConnectionId, Weak<ConnectionInner>>>;

/// A typed, directed connection point. Clones share identity.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

impl Port {
    fn new(name: impl Into<String>, direction: PortDirection, endpoint: Endpoint) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id: PortId::next(),
                name: name.into(),
                direction,
                endpoint,
                links: Arc::new(Mutex::new(IndexMap::new())),
            }),
        }
    }

    pub fn signal_input(name: impl Into<String>, unit: &SignalUnit) -> Self {
        Self::new(name, PortDirection::Input, Endpoint::Signal(unit.clone()))
    }

    pub fn signal_output(name: impl Into<String>, unit: &SignalUnit) -> Self {
        Self::new(name, PortDirection::Output, Endpoint::Signal(unit.clone()))
    }

    pub fn control_input(name: impl Into<String>, cell: &ControlCell) -> Self {
        Self::new(name, PortDirection::Input, Endpoint::Control(cell.clone()))
    }

    pub fn control_output(name: impl Into<String>, cell: &ControlCell) -> Self {
        Self::new(name, PortDirection::Output, Endpoint::Control(cell.clone()))
    }

    /// The same port under another name. Both names share identity and
    /// connections: detaching either severs links made through the other.
    pub fn alias(&self, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id: self.inner.id,
                name: name.into(),
                direction: self.inner.direction,
                endpoint: self.inner.endpoint.clone(),
                links: self.inner.links.clone(),
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn direction(&self) -> PortDirection {
        self.inner.direction
    }

    pub fn kind(&self) -> PortKind {
        match self.inner.endpoint {
            Endpoint::Signal(_) => PortKind::Signal,
            Endpoint::Control(_) => PortKind::Control,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn unit(&self) -> Option<&SignalUnit> {
        match &self.inner.endpoint {
            Endpoint::Signal(unit) => Some(unit),
            Endpoint::Control(_) => None,
        }
    }

    pub fn cell(&self) -> Option<&ControlCell> {
        match &self.inner.endpoint {
            Endpoint::Control(cell) => Some(cell),
            Endpoint::Signal(_) => None,
        }
    }

    /// Number of live connections touching this port.
    pub fn link_count(&self) -> usize {
        self.inner
            .links
            .lock()
            .values()
            .filter(|link| link.strong_count() > 0)
            .count()
    }

    /// Sever every connection touching this port. Returns how many were live.
    pub fn detach_all(&self) -> usize {
        // Collect first: severing re-enters `detach`.
        let links: SmallVec<[Weak<ConnectionInner>; 4]> =
            self.inner.links.lock().drain(..).map(|(_, link)| link).collect();

        links
            .into_iter()
            .filter_map(|link| link.upgrade())
            .map(Connection::from_inner)
            .filter(|connection| connection.sever())
            .count()
    }

    pub(crate) fn attach(&self, id: ConnectionId, link: Weak<ConnectionInner>) {
        self.inner.links.lock().insert(id, link);
    }

    pub(crate) fn detach(&self, id: ConnectionId) {
        self.inner.links.lock().shift_remove(&id);
    }

    pub fn same_as(&self, other: &Port) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("direction", &self.direction())
            .finish()
    }
}
