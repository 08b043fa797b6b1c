//! Port-to-port connections.
//!
//! [`connect`] validates a pair of ports and wires them: signal ports are
//! piped unit to unit, control ports are bound cell to cell. Validation
//! happens before any wiring, so a rejected connection leaves both ports
//! untouched.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::port::{Endpoint, Port, PortDirection, PortKind};
use super::unit::{pipe, Pipe};
use crate::dispose::Disposable;
use crate::error::{GraphError, Result};
use crate::reactive::{bind, Unbinder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

enum Wiring {
    Signal(Pipe),
    Control(Unbinder),
}

impl Wiring {
    fn release(mut self) {
        match &mut self {
            Wiring::Signal(pipe) => {
                pipe.disconnect();
            }
            Wiring::Control(unbinder) => {
                unbinder.unbind();
            }
        }
    }
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    kind: PortKind,
    from: Port,
    to: Port,
    wiring: Mutex<Option<Wiring>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(wiring) = self.wiring.get_mut().take() {
            wiring.release();
        }
        self.from.detach(self.id);
        self.to.detach(self.id);
    }
}

/// A live link between an output port and an input port.
///
/// Clones share the link. It is severed by [`Connection::sever`], by
/// detaching either port, or when the last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn kind(&self) -> PortKind {
        self.inner.kind
    }

    pub fn from_port(&self) -> &Port {
        &self.inner.from
    }

    pub fn to_port(&self) -> &Port {
        &self.inner.to
    }

    pub fn is_live(&self) -> bool {
        self.inner.wiring.lock().is_some()
    }

    /// Undo the wiring. Returns `false` if already severed.
    pub fn sever(&self) -> bool {
        let Some(wiring) = self.inner.wiring.lock().take() else {
            return false;
        };
        wiring.release();
        self.inner.from.detach(self.inner.id);
        self.inner.to.detach(self.inner.id);
        debug!(
            id = %self.inner.id,
            from = %self.inner.from.name(),
            to = %self.inner.to.name(),
            "connection severed"
        );
        true
    }
}

impl Disposable for Connection {
    fn dispose(&mut self) -> Result<()> {
        self.sever();
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("from", &self.inner.from.name())
            .field("to", &self.inner.to.name())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Connect `output` to `input`.
///
/// Kinds are checked first, then directions. Errors are returned before
/// anything is wired.
#[must_use = "dropping the only Connection handle severs it"]
pub fn connect(output: &Port, input: &Port) -> Result<Connection> {
    if output.kind() != input.kind() {
        return Err(GraphError::KindMismatch {
            output_port: output.name().to_string(),
            output: output.kind(),
            input_port: input.name().to_string(),
            input: input.kind(),
        });
    }
    for (port, expected) in [(output, PortDirection::Output), (input, PortDirection::Input)] {
        if port.direction() != expected {
            return Err(GraphError::DirectionMismatch {
                port: port.name().to_string(),
                expected,
                actual: port.direction(),
            });
        }
    }

    let wiring = match (output.endpoint(), input.endpoint()) {
        (Endpoint::Signal(from), Endpoint::Signal(to)) => Wiring::Signal(pipe(from, to)?),
        (Endpoint::Control(from), Endpoint::Control(to)) => Wiring::Control(bind(from, to)?),
        // Kinds were checked above.
        _ => {
            return Err(GraphError::KindMismatch {
                output_port: output.name().to_string(),
                output: output.kind(),
                input_port: input.name().to_string(),
                input: input.kind(),
            })
        }
    };

    let inner = Arc::new(ConnectionInner {
        id: ConnectionId::next(),
        kind: output.kind(),
        from: output.clone(),
        to: input.clone(),
        wiring: Mutex::new(Some(wiring)),
    });
    output.attach(inner.id, Arc::downgrade(&inner));
    input.attach(inner.id, Arc::downgrade(&inner));
    debug!(id = %inner.id, kind = %inner.kind, from = %output.name(), to = %input.name(), "connected");

    Ok(Connection { inner })
}
