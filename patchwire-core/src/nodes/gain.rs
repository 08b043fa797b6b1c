use std::any::Any;

use crate::config::NodeConfig;
use crate::context::AudioContext;
use crate::dispose::DisposerBundle;
use crate::error::Result;
use crate::graph::{AudioParam, GainKernel, Node, Port, SignalUnit};
use crate::reactive::{bind, ControlCell, ControlRange};

use super::control_cell;

/// Scales its input by the `gain` cell (0..=4).
pub struct GainNode {
    gain: ControlCell,
    param: AudioParam,
    ports: Vec<Port>,
}

impl GainNode {
    pub const TYPE_NAME: &'static str = "gain";

    pub fn new(config: &NodeConfig) -> Result<Self> {
        let gain = control_cell(config, "gain", ControlRange::new(0.0, 4.0, 1.0))?;
        let param = AudioParam::new("gain", 1.0);
        let unit = SignalUnit::new("gain", GainKernel::new(param.clone()));
        let ports = vec![
            Port::signal_input("input", &unit),
            Port::signal_output("output", &unit),
            Port::control_input("gain", &gain),
        ];
        Ok(Self { gain, param, ports })
    }

    pub fn gain(&self) -> &ControlCell {
        &self.gain
    }
}

impl Node for GainNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn ports(&self) -> Vec<Port> {
        self.ports.clone()
    }

    fn on_connect(&mut self, _ctx: &AudioContext) -> Result<DisposerBundle> {
        let mut bundle = DisposerBundle::new(Self::TYPE_NAME);
        bundle.add("gain -> param", bind(&self.gain, &self.param)?);
        Ok(bundle)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
