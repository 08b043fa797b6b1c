//! Saturator
//!
//! ```text
//!            +--> shaper --> wet gain --+
//!  input gain                           +--> merger --> output gain
//!            +--> dry gain -------------+
//! ```
//!
//! `drive` drives the input gain, `dry_wet` the wet gain and `output` the
//! output gain. The shaper's table follows `mode` (and `drive`, for the one
//! curve that uses it) through an effect, so changing an unrelated control
//! never recomputes the table.

use std::any::Any;
use std::sync::Arc;

use tracing::warn;

use crate::config::NodeConfig;
use crate::context::AudioContext;
use crate::dispose::DisposerBundle;
use crate::error::Result;
use crate::graph::{pipe, AudioParam, GainKernel, Node, PassKernel, Port, SignalUnit};
use crate::reactive::{bind, ControlCell, ControlRange, Effect};
use crate::transfer::{ShaperKernel, TableHandle, TransferMode, TransferParams};

use super::control_cell;

struct Units {
    input: SignalUnit,
    shaper: SignalUnit,
    wet: SignalUnit,
    dry: SignalUnit,
    merger: SignalUnit,
    output: SignalUnit,
}

struct Params {
    input: AudioParam,
    wet: AudioParam,
    output: AudioParam,
}

pub struct SaturatorNode {
    drive: ControlCell,
    output: ControlCell,
    dry_wet: ControlCell,
    soft_clip: ControlCell,
    mode: ControlCell,
    params: Params,
    units: Units,
    table: TableHandle,
    ports: Vec<Port>,
}

impl SaturatorNode {
    pub const TYPE_NAME: &'static str = "saturator";

    pub fn new(ctx: &AudioContext, config: &NodeConfig) -> Result<Self> {
        let drive = control_cell(config, "drive", ControlRange::new(0.0, 24.0, 1.0))?;
        let output = control_cell(config, "output", ControlRange::new(0.0, 2.0, 1.0))?;
        let dry_wet = control_cell(config, "dry_wet", ControlRange::new(0.0, 1.0, 1.0))?;
        let soft_clip = control_cell(config, "soft_clip", ControlRange::new(0.0, 1.0, 0.0))?;
        let mode = control_cell(config, "mode", ControlRange::new(0.0, 5.0, 0.0))?;

        let params = Params {
            input: AudioParam::new("input gain", 1.0),
            wet: AudioParam::new("wet gain", 1.0),
            output: AudioParam::new("output gain", 1.0),
        };
        let table = TableHandle::new(curve_for(ctx, &mode, &drive)?);
        let units = Units {
            input: SignalUnit::new("saturator input", GainKernel::new(params.input.clone())),
            shaper: SignalUnit::new("saturator shaper", ShaperKernel::new(table.clone())),
            wet: SignalUnit::new("saturator wet", GainKernel::new(params.wet.clone())),
            dry: SignalUnit::new("saturator dry", GainKernel::new(AudioParam::new("dry gain", 1.0))),
            merger: SignalUnit::new("saturator merger", PassKernel),
            output: SignalUnit::new("saturator output", GainKernel::new(params.output.clone())),
        };

        let ports = vec![
            Port::signal_input("input", &units.input),
            Port::signal_output("output", &units.output),
            Port::control_input("drive", &drive),
            Port::control_input("output_level", &output),
            Port::control_input("dry_wet", &dry_wet),
            Port::control_input("soft_clip", &soft_clip),
            Port::control_input("mode", &mode),
        ];

        Ok(Self {
            drive,
            output,
            dry_wet,
            soft_clip,
            mode,
            params,
            units,
            table,
            ports,
        })
    }

    pub fn drive(&self) -> &ControlCell {
        &self.drive
    }

    pub fn output(&self) -> &ControlCell {
        &self.output
    }

    pub fn dry_wet(&self) -> &ControlCell {
        &self.dry_wet
    }

    pub fn soft_clip(&self) -> &ControlCell {
        &self.soft_clip
    }

    pub fn mode(&self) -> &ControlCell {
        &self.mode
    }

    pub fn transfer_mode(&self) -> TransferMode {
        TransferMode::from_f32(self.mode.get_untracked())
    }

    /// The installed transfer table.
    pub fn curve(&self) -> Arc<Vec<f32>> {
        self.table.load()
    }

    /// The native gain `drive` is bound to.
    pub fn input_gain(&self) -> &AudioParam {
        &self.params.input
    }
}

fn curve_for(ctx: &AudioContext, mode: &ControlCell, drive: &ControlCell) -> Result<Vec<f32>> {
    let mode = TransferMode::from_f32(mode.get());
    let params = if mode.uses_drive() {
        TransferParams::with_drive(drive.get())
    } else {
        TransferParams::default()
    };
    ctx.transfer().compute_table(mode, &params, ctx.table_len())
}

impl Node for SaturatorNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn ports(&self) -> Vec<Port> {
        self.ports.clone()
    }

    fn on_connect(&mut self, ctx: &AudioContext) -> Result<DisposerBundle> {
        let mut bundle = DisposerBundle::new(Self::TYPE_NAME);
        bundle.add("drive -> input gain", bind(&self.drive, &self.params.input)?);
        bundle.add("output -> output gain", bind(&self.output, &self.params.output)?);
        bundle.add("dry_wet -> wet gain", bind(&self.dry_wet, &self.params.wet)?);

        let units = &self.units;
        for (label, from, to) in [
            ("input -> shaper", &units.input, &units.shaper),
            ("shaper -> wet", &units.shaper, &units.wet),
            ("wet -> merger", &units.wet, &units.merger),
            ("input -> dry", &units.input, &units.dry),
            ("dry -> merger", &units.dry, &units.merger),
            ("merger -> output", &units.merger, &units.output),
        ] {
            bundle.add(label, pipe(from, to)?);
        }

        let effect = Effect::new({
            let ctx = ctx.clone();
            let (mode, drive, table) = (self.mode.clone(), self.drive.clone(), self.table.clone());
            move || match curve_for(&ctx, &mode, &drive) {
                Ok(curve) => table.apply(curve),
                Err(error) => warn!(%error, "transfer table left unchanged"),
            }
        });
        bundle.add("curve effect", effect);

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

    fn connected(config: NodeConfig) -> NodeHandle {
        let ctx = AudioContext::default();
        let node = SaturatorNode::new(&ctx, &config).unwrap();
        let mut handle = NodeHandle::new(Box::new(node), "sat");
        handle.connect(&ctx).unwrap();
        handle
    }

    fn sat(handle: &NodeHandle) -> &SaturatorNode {
        handle.downcast_ref::<SaturatorNode>().unwrap()
    }

    #[test]
    fn drive_is_clamped_into_input_gain() {
        let handle = connected(NodeConfig::new());
        let node = sat(&handle);

        node.drive().set(30.0);
        assert_eq!(node.input_gain().get(), 24.0);
        node.drive().set(-5.0);
        assert_eq!(node.input_gain().get(), 0.0);
    }

    #[test]
    fn mode_change_installs_new_curve() {
        let handle = connected(NodeConfig::new());
        let node = sat(&handle);
        let n = node.curve().len();

        node.mode().set(2.0);
        assert_eq!(node.transfer_mode(), TransferMode::HardClip);
        let curve = node.curve();
        assert!(curve[n / 2].abs() < 1e-3);
        assert!((curve[n - 1] - 1.0).abs() < 1e-3);

        node.mode().set(3.0);
        assert!((node.curve()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unrelated_controls_keep_the_table() {
        let handle = connected(NodeConfig::new().with("mode", 2.0));
        let node = sat(&handle);
        let before = node.curve();

        node.drive().set(12.0);
        node.output().set(0.5);
        assert!(Arc::ptr_eq(&before, &node.curve()));
    }

    #[test]
    fn drive_reshapes_analog_clip() {
        let handle = connected(NodeConfig::new().with("drive", 0.0));
        let node = sat(&handle);
        let before = node.curve();

        node.drive().set(18.0);
        let after = node.curve();
        assert!(!Arc::ptr_eq(&before, &after));
        let q = after.len() * 3 / 4;
        assert!(after[q] > before[q]);
    }

    #[test]
    fn disconnect_stops_control_flow() {
        let mut handle = connected(NodeConfig::new());
        let report = handle.disconnect();
        assert!(report.is_clean());
        assert_eq!(report.completed, 10);

        let node = sat(&handle);
        let before = node.curve();
        node.mode().set(4.0);
        node.drive().set(3.0);
        assert!(Arc::ptr_eq(&before, &node.curve()));
        assert_eq!(node.input_gain().get(), 1.0);
        assert_eq!(node.drive().subscriber_count(), 0);
    }

    #[test]
    fn teardown_labels_are_plain_ascii() {
        let ctx = AudioContext::default();
        let mut node = SaturatorNode::new(&ctx, &NodeConfig::new()).unwrap();
        let mut bundle = node.on_connect(&ctx).unwrap();

        let labels = bundle.labels();
        assert_eq!(labels.len(), 10);
        assert!(labels.contains(&"drive -> input gain"));
        assert!(labels.iter().all(|label| label.is_ascii()));
        assert!(bundle.dispose().is_clean());
    }

    #[test]
    fn renders_dry_plus_shaped() {
        let ctx = AudioContext::default();
        let config = NodeConfig::new()
            .with("mode", 2.0)
            .with("drive", 1.0)
            .with("dry_wet", 1.0);
        let mut handle = NodeHandle::new(
            Box::new(SaturatorNode::new(&ctx, &config).unwrap()),
            "sat",
        );
        handle.connect(&ctx).unwrap();

        let level = AudioParam::new("level", 0.5);
        let source = SignalUnit::new("src", crate::graph::ConstantKernel::new(level));
        let input = handle.port("input").unwrap();
        let _link = pipe(&source, input.unit().unwrap()).unwrap();

        let out = handle.port("output").unwrap().unit().unwrap().render(1, 4);
        // dry 0.5 + hard-clipped 0.5.
        for sample in out {
            assert!((sample - 1.0).abs() < 1e-3, "{sample}");
        }
    }
}
