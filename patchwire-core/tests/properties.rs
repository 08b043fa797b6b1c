//! Property-based tests for the graph runtime.
//!
//! Uses proptest to check the invariants that must hold for every input:
//! clamped propagation, collection bookkeeping, connection round trips and
//! table determinism.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use patchwire_core::{
    bind, AudioContext, AudioParam, ControlCell, ControlRange, DisposerBundle, EngineConfig, Graph,
    Node, NodeConfig, NodeId, Port, Result, SubNodeCollection, TransferMode, TransferParams,
    TransferRegistry,
};

#[derive(Default)]
struct Ledger {
    connects: HashMap<String, usize>,
    disposals: HashMap<String, usize>,
}

struct Occupant {
    name: String,
    ledger: Arc<Mutex<Ledger>>,
}

impl Node for Occupant {
    fn type_name(&self) -> &'static str {
        "occupant"
    }

    fn ports(&self) -> Vec<Port> {
        Vec::new()
    }

    fn on_connect(&mut self, _ctx: &AudioContext) -> Result<DisposerBundle> {
        *self.ledger.lock().connects.entry(self.name.clone()).or_default() += 1;
        let (ledger, name) = (self.ledger.clone(), self.name.clone());
        let mut bundle = DisposerBundle::new("occupant");
        bundle.defer("ledger", move || {
            *ledger.lock().disposals.entry(name).or_default() += 1;
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

#[derive(Debug, Clone)]
enum Op {
    Append(bool),
    Replace(usize, bool),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Append),
        (0usize..8, any::<bool>()).prop_map(|(i, present)| Op::Replace(i, present)),
        (0usize..8).prop_map(Op::Remove),
    ]
}

fn gain_graph(count: usize) -> (Graph, Vec<NodeId>) {
    let mut graph = Graph::with_config(EngineConfig::default()).unwrap();
    let ids = (0..count)
        .map(|_| graph.instantiate("gain", &NodeConfig::new()).unwrap())
        .collect();
    (graph, ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every write stores `clamp(v, min, max)` and every bound target sees
    /// that value before `set` returns.
    #[test]
    fn writes_are_clamped_and_propagated(
        a in -100.0f32..100.0,
        b in -100.0f32..100.0,
        writes in prop::collection::vec(-1000.0f32..1000.0, 1..16),
    ) {
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        let cell = ControlCell::new("cell", ControlRange::new(min, max, min)).unwrap();
        let mirror = ControlCell::new("mirror", ControlRange::unbounded(0.0)).unwrap();
        let param = AudioParam::new("param", 0.0);
        let _to_mirror = bind(&cell, &mirror).unwrap();
        let _to_param = bind(&cell, &param).unwrap();

        for v in writes {
            let expected = v.clamp(min, max);
            let stored = cell.set(v);
            prop_assert_eq!(stored, expected);
            prop_assert_eq!(cell.get_untracked(), expected);
            prop_assert_eq!(mirror.get_untracked(), expected);
            prop_assert_eq!(param.get(), expected);
        }
    }

    /// After any sequence of mutations, live children equal occupied slots
    /// and no occupancy is connected or disposed more than once.
    #[test]
    fn collection_children_match_occupied_slots(ops in prop::collection::vec(op(), 0..40)) {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let mut slots = SubNodeCollection::new("slots", &AudioContext::default(), {
            let ledger = ledger.clone();
            move |name: &String| {
                Ok(Box::new(Occupant { name: name.clone(), ledger: ledger.clone() }) as Box<dyn Node>)
            }
        });

        let mut next = 0usize;
        let mut fresh = |present: bool| {
            present.then(|| {
                next += 1;
                format!("occupant-{next}")
            })
        };

        for op in ops {
            match op {
                Op::Append(present) => {
                    slots.append(fresh(present)).unwrap();
                }
                Op::Replace(i, present) if i < slots.len() => {
                    slots.replace_at(i, fresh(present)).unwrap();
                }
                Op::Remove(i) if i < slots.len() => {
                    slots.remove_at(i).unwrap();
                }
                Op::Replace(i, _) | Op::Remove(i) => {
                    let len = slots.len();
                    prop_assert!(slots.remove_at(i).is_err());
                    prop_assert_eq!(slots.len(), len);
                }
            }
            prop_assert_eq!(slots.live_count(), slots.occupied_count());
        }

        let ledger = ledger.lock();
        prop_assert!(ledger.connects.values().all(|n| *n == 1));
        prop_assert!(ledger.disposals.values().all(|n| *n == 1));
        let live: Vec<_> = slots.values().flatten().cloned().collect();
        for name in &live {
            prop_assert!(!ledger.disposals.contains_key(name));
        }
        prop_assert_eq!(ledger.connects.len(), ledger.disposals.len() + live.len());
    }

    /// Connecting then severing leaves the connection set as it was.
    #[test]
    fn connect_sever_round_trip(
        existing in prop::collection::vec((0usize..4, 0usize..4), 0..6),
        pair in (0usize..4, 0usize..4),
    ) {
        let (mut graph, ids) = gain_graph(4);
        for (from, to) in existing {
            // Duplicates are rejected; that's fine here.
            let _ = graph.connect((ids[from], "output"), (ids[to], "input"));
        }
        let before = graph.connections();

        match graph.connect((ids[pair.0], "output"), (ids[pair.1], "input")) {
            Ok(link) => {
                prop_assert_eq!(graph.connection_count(), before.len() + 1);
                prop_assert!(graph.sever(link));
                prop_assert!(!graph.sever(link));
            }
            Err(_) => {}
        }
        prop_assert_eq!(graph.connections(), before);
    }

    /// Identical inputs give bit-identical tables.
    #[test]
    fn tables_are_deterministic(index in 0i64..8, drive in 0.0f32..24.0, len in 2usize..2048) {
        let registry = TransferRegistry::with_builtins();
        let mode = TransferMode::from_index(index);
        let params = TransferParams::with_drive(drive);
        let a = registry.compute_table(mode, &params, len).unwrap();
        let b = registry.compute_table(mode, &params, len).unwrap();
        prop_assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
        prop_assert!(a.iter().all(|y| (-1.0..=1.0).contains(y)));
    }
}
