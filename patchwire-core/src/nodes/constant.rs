use std::any::Any;

use crate::config::NodeConfig;
use crate::context::AudioContext;
use crate::dispose::DisposerBundle;
use crate::error::Result;
use crate::graph::{AudioParam, ConstantKernel, Node, Port, SignalUnit};
use crate::reactive::{bind, ControlCell, ControlRange};

use super::control_cell;

/// Emits the value of its `value` cell as a signal.
pub struct ConstantNode {
    value: ControlCell,
    level: AudioParam,
    ports: Vec<Port>,
}

impl ConstantNode {
    pub const TYPE_NAME: &'static str = "constant";

    pub fn new(config: &NodeConfig) -> Result<Self> {
        let value = control_cell(config, "value", ControlRange::unbounded(0.0))?;
        let level = AudioParam::new("level", 0.0);
        let unit = SignalUnit::new("constant", ConstantKernel::new(level.clone()));
        let ports = vec![
            Port::control_input("value", &value),
            Port::signal_output("output", &unit),
        ];
        Ok(Self { value, level, ports })
    }

    pub fn value(&self) -> &ControlCell {
        &self.value
    }
}

impl Node for ConstantNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn ports(&self) -> Vec<Port> {
        self.ports.clone()
    }

    fn on_connect(&mut self, _ctx: &AudioContext) -> Result<DisposerBundle> {
        let mut bundle = DisposerBundle::new(Self::TYPE_NAME);
        bundle.add("value -> level", bind(&self.value, &self.level)?);
        Ok(bundle)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
