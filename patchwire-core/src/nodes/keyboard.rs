//! Keyboard
//!
//! A row of key slots. Each occupied slot owns a [`KeyNode`] whose `gate`
//! output follows one key: 1 while held, 0 otherwise. Key children and
//! their ports live as long as their slot, independent of whether the
//! keyboard is connected. Connecting the keyboard only starts listening for
//! input: held keys drive their gates, and pressing a key that no slot
//! holds fills the first empty slot.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::collection::SubNodeCollection;
use crate::config::NodeConfig;
use crate::context::AudioContext;
use crate::dispose::DisposerBundle;
use crate::error::Result;
use crate::events::{EventKind, InputEvent};
use crate::graph::{Node, Port};
use crate::reactive::{ControlCell, ControlRange};

/// One key: a gate cell exposed as a control output.
pub struct KeyNode {
    code: String,
    gate: ControlCell,
    port: Port,
}

impl KeyNode {
    pub const TYPE_NAME: &'static str = "key";

    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        let gate = ControlCell::new(format!("gate {code}"), ControlRange::new(0.0, 1.0, 0.0))?;
        let port = Port::control_output("gate", &gate);
        Ok(Self { code, gate, port })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn gate(&self) -> &ControlCell {
        &self.gate
    }
}

impl Node for KeyNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn ports(&self) -> Vec<Port> {
        vec![self.port.clone()]
    }

    fn on_connect(&mut self, _ctx: &AudioContext) -> Result<DisposerBundle> {
        let mut bundle = DisposerBundle::new(format!("key {}", self.code));
        let gate = self.gate.clone();
        bundle.defer("release gate", move || {
            gate.set(0.0);
        });
        Ok(bundle)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type Keys = Mutex<SubNodeCollection<String>>;

pub struct KeyboardNode {
    keys: Arc<Keys>,
    dedupe: bool,
}

impl KeyboardNode {
    pub const TYPE_NAME: &'static str = "keyboard";

    /// Settings: `keys` (initial slots, strings or null) and `dedupe`
    /// (default true).
    pub fn new(ctx: &AudioContext, config: &NodeConfig) -> Result<Self> {
        let mut keys = SubNodeCollection::new("keyboard keys", ctx, |code: &String| {
            Ok(Box::new(KeyNode::new(code.clone())?) as Box<dyn Node>)
        });
        for code in config.string_list("keys")?.unwrap_or_default() {
            keys.append(code)?;
        }
        Ok(Self {
            keys: Arc::new(Mutex::new(keys)),
            dedupe: config.bool("dedupe")?.unwrap_or(true),
        })
    }

    /// Snapshot of the slot values.
    pub fn keys(&self) -> Vec<Option<String>> {
        self.keys.lock().values().map(|v| v.cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Number of live key children.
    pub fn live_keys(&self) -> usize {
        self.keys.lock().live_count()
    }

    pub fn dedupe(&self) -> bool {
        self.dedupe
    }

    /// The gate of the key child at `index`, if that slot is occupied.
    pub fn gate(&self, index: usize) -> Option<ControlCell> {
        let keys = self.keys.lock();
        let key = keys.child(index)?.downcast_ref::<KeyNode>()?;
        Some(key.gate().clone())
    }

    /// Append an empty slot.
    pub fn add_slot(&self) -> Result<usize> {
        self.keys.lock().append(None)
    }

    /// Bind `code` to slot `index`. Duplicates are allowed here.
    pub fn assign(&self, index: usize, code: impl Into<String>) -> Result<Option<String>> {
        self.keys.lock().replace_at(index, Some(code.into()))
    }

    /// Empty slot `index`, keeping the slot.
    pub fn clear_slot(&self, index: usize) -> Result<Option<String>> {
        self.keys.lock().replace_at(index, None)
    }

    pub fn remove_slot(&self, index: usize) -> Result<Option<String>> {
        self.keys.lock().remove_at(index)
    }
}

/// `(code, gate)` for every live key child, taken under the lock so gates
/// can be written after it is released.
fn held_gates(keys: &SubNodeCollection<String>) -> Vec<(String, ControlCell)> {
    (0..keys.len())
        .filter_map(|index| keys.child(index)?.downcast_ref::<KeyNode>())
        .map(|key| (key.code().to_string(), key.gate().clone()))
        .collect()
}

fn auto_assign(keys: &Keys, code: &str, dedupe: bool) {
    let mut keys = keys.lock();
    if dedupe && keys.position(|held| held == code).is_some() {
        return;
    }
    let Some(index) = keys.first_empty() else {
        return;
    };
    match keys.replace_at(index, Some(code.to_string())) {
        Ok(_) => debug!(index, code, "key assigned"),
        Err(error) => warn!(index, code, %error, "key assignment failed"),
    }
}

fn route(keys: &Weak<Keys>, event: &InputEvent, dedupe: bool) {
    let Some(keys) = keys.upgrade() else {
        return;
    };
    // A key assigned by this event reacts from the next event on.
    let gates = held_gates(&keys.lock());
    if event.kind == EventKind::Activate {
        auto_assign(&keys, &event.identifier, dedupe);
    }

    for (code, gate) in gates {
        match event.kind {
            EventKind::Activate if !event.modified && event.identifier == code => {
                gate.set(1.0);
            }
            EventKind::Deactivate if event.identifier == code => {
                gate.set(0.0);
            }
            EventKind::Reset => {
                gate.set(0.0);
            }
            _ => {}
        }
    }
}

impl Node for KeyboardNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn ports(&self) -> Vec<Port> {
        let keys = self.keys.lock();
        (0..keys.len())
            .filter_map(|index| {
                let gate = keys.child(index)?.port("gate")?;
                Some(gate.alias(format!("key{index}")))
            })
            .collect()
    }

    fn on_connect(&mut self, ctx: &AudioContext) -> Result<DisposerBundle> {
        let mut bundle = DisposerBundle::new(Self::TYPE_NAME);

        let (keys, dedupe) = (Arc::downgrade(&self.keys), self.dedupe);
        let subscription = ctx
            .events()
            .subscribe(move |event| route(&keys, event, dedupe));
        bundle.add("key events", subscription);

        let keys = Arc::downgrade(&self.keys);
        bundle.defer("release gates", move || {
            let Some(keys) = keys.upgrade() else {
                return;
            };
            let gates = held_gates(&keys.lock());
            for (_, gate) in gates {
                gate.set(0.0);
            }
        });
        Ok(bundle)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeHandle;

    fn keyboard(ctx: &AudioContext, config: NodeConfig) -> NodeHandle {
        let node = KeyboardNode::new(ctx, &config).unwrap();
        let mut handle = NodeHandle::new(Box::new(node), "kb");
        handle.connect(ctx).unwrap();
        handle
    }

    fn kb(handle: &NodeHandle) -> &KeyboardNode {
        handle.downcast_ref::<KeyboardNode>().unwrap()
    }

    #[test]
    fn press_fills_first_empty_slot() {
        let ctx = AudioContext::default();
        let handle = keyboard(&ctx, NodeConfig::new().with("keys", vec![Some("KeyA"), None, None]));
        let node = kb(&handle);
        assert_eq!(node.live_keys(), 1);

        ctx.events().publish(&InputEvent::activate("KeyS"));
        assert_eq!(node.keys(), vec![Some("KeyA".into()), Some("KeyS".into()), None]);
        assert_eq!(node.live_keys(), 2);

        // The new key reacts from the next event on.
        let gate = node.gate(1).unwrap();
        assert_eq!(gate.get_untracked(), 0.0);
        ctx.events().publish(&InputEvent::activate("KeyS"));
        assert_eq!(gate.get_untracked(), 1.0);
        ctx.events().publish(&InputEvent::deactivate("KeyS"));
        assert_eq!(gate.get_untracked(), 0.0);
    }

    #[test]
    fn held_key_is_not_assigned_twice_by_default() {
        let ctx = AudioContext::default();
        let handle = keyboard(&ctx, NodeConfig::new().with("keys", vec![Some("KeyA"), None]));
        ctx.events().publish(&InputEvent::activate("KeyA"));
        assert_eq!(kb(&handle).keys(), vec![Some("KeyA".into()), None]);
    }

    #[test]
    fn dedupe_can_be_disabled() {
        let ctx = AudioContext::default();
        let config = NodeConfig::new()
            .with("keys", vec![Some("KeyA"), None])
            .with("dedupe", false);
        let handle = keyboard(&ctx, config);
        ctx.events().publish(&InputEvent::activate("KeyA"));
        assert_eq!(
            kb(&handle).keys(),
            vec![Some("KeyA".into()), Some("KeyA".into())]
        );
    }

    #[test]
    fn modified_press_and_reset() {
        let ctx = AudioContext::default();
        let handle = keyboard(&ctx, NodeConfig::new().with("keys", vec![Some("KeyQ")]));
        let gate = kb(&handle).gate(0).unwrap();

        ctx.events().publish(&InputEvent::activate("KeyQ").with_modifier());
        assert_eq!(gate.get_untracked(), 0.0);

        ctx.events().publish(&InputEvent::activate("KeyQ"));
        assert_eq!(gate.get_untracked(), 1.0);
        ctx.events().publish(&InputEvent::reset());
        assert_eq!(gate.get_untracked(), 0.0);
    }

    #[test]
    fn keys_outlive_a_disconnect() {
        let ctx = AudioContext::default();
        let mut handle = keyboard(&ctx, NodeConfig::new().with("keys", vec![Some("KeyA"), None]));
        let port = handle.port("key0").unwrap();
        let gate = kb(&handle).gate(0).unwrap();

        ctx.events().publish(&InputEvent::activate("KeyA"));
        assert_eq!(gate.get_untracked(), 1.0);

        let report = handle.disconnect();
        assert!(report.is_clean());
        assert_eq!(gate.get_untracked(), 0.0);
        assert_eq!(kb(&handle).live_keys(), 1);
        assert!(handle.port("key0").unwrap().same_as(&port));

        // Not listening while disconnected.
        assert_eq!(ctx.events().listener_count(), 0);
        ctx.events().publish(&InputEvent::activate("KeyC"));
        assert_eq!(kb(&handle).keys(), vec![Some("KeyA".into()), None]);

        handle.connect(&ctx).unwrap();
        ctx.events().publish(&InputEvent::activate("KeyA"));
        assert_eq!(gate.get_untracked(), 1.0);
    }

    #[test]
    fn ports_exist_before_connect() {
        let ctx = AudioContext::default();
        let node = KeyboardNode::new(&ctx, &NodeConfig::new().with("keys", vec![Some("KeyA")])).unwrap();
        let handle = NodeHandle::new(Box::new(node), "kb");
        assert!(handle.port("key0").is_some());
        assert_eq!(kb(&handle).live_keys(), 1);
        assert_eq!(ctx.events().listener_count(), 0);
    }

    #[test]
    fn ports_track_slot_positions() {
        let ctx = AudioContext::default();
        let handle = keyboard(&ctx, NodeConfig::new());
        let node = kb(&handle);
        node.add_slot().unwrap();
        node.add_slot().unwrap();
        node.assign(1, "KeyW").unwrap();
        assert!(handle.port("key0").is_none());
        assert!(handle.port("key1").is_some());

        node.remove_slot(0).unwrap();
        assert!(handle.port("key0").is_some());
        node.clear_slot(0).unwrap();
        assert!(handle.port("key0").is_none());
        assert_eq!(node.len(), 1);
    }
}
