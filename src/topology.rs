//! Canonical graph topologies.
//!
//! Essentially every experimental protocol builds one of three graphs:
//! plain analog I/O, conductance stimulation of one or more real
//! neurons, or externally triggered I/O. The helpers here construct
//! those documents from channel descriptors, filling omitted fields
//! from the process-wide [`Defaults`].

use indexmap::IndexMap;
use tracing::debug;

use crate::config::{Document, NodeIds, TriggerDescriptor};
use crate::defaults::{ClampMode, Defaults};
use crate::entity::{Node, NodeId, NodeKind, Params};
use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Input,
    Output,
}

/// A channel descriptor; every field except `direction` may be omitted
/// and is then filled from the defaults (per the clamp mode).
#[derive(Clone, PartialEq, Debug)]
pub struct ChannelDescriptor {
    pub direction: Direction,
    pub mode: ClampMode,
    pub subdevice: Option<u32>,
    pub channel: Option<u32>,
    pub units: Option<String>,
    pub factor: Option<f64>,
    pub reference: Option<String>,
    pub range: Option<String>,
    pub stimfile: Option<String>,
    pub kernel_file: Option<String>,
    pub offset: Option<f64>,
    pub reset_output: Option<bool>,
}

impl ChannelDescriptor {
    pub fn new(direction: Direction) -> ChannelDescriptor {
        ChannelDescriptor {
            direction,
            mode: ClampMode::CurrentClamp,
            subdevice: None,
            channel: None,
            units: None,
            factor: None,
            reference: None,
            range: None,
            stimfile: None,
            kernel_file: None,
            offset: None,
            reset_output: None,
        }
    }

    pub fn input() -> ChannelDescriptor {
        ChannelDescriptor::new(Direction::Input)
    }

    pub fn output() -> ChannelDescriptor {
        ChannelDescriptor::new(Direction::Output)
    }

    pub fn channel(mut self, channel: u32) -> ChannelDescriptor {
        self.channel = Some(channel);
        self
    }

    pub fn stimfile(mut self, path: &str) -> ChannelDescriptor {
        self.stimfile = Some(path.to_string());
        self
    }

    pub fn kernel_file(mut self, path: &str) -> ChannelDescriptor {
        self.kernel_file = Some(path.to_string());
        self
    }

    pub fn mode(mut self, mode: ClampMode) -> ChannelDescriptor {
        self.mode = mode;
        self
    }
}

/// A descriptor with every field filled in.
struct Resolved {
    direction: Direction,
    subdevice: u32,
    channel: u32,
    units: String,
    factor: f64,
    reference: String,
    range: String,
    stimfile: Option<String>,
    kernel_file: Option<String>,
    offset: Option<f64>,
    reset_output: bool,
}

fn resolve(descriptor: &ChannelDescriptor, defaults: &Defaults) -> Resolved {
    let mode = defaults.mode(descriptor.mode);
    let (subdevice, channel, units, factor) = match descriptor.direction {
        Direction::Input => (
            defaults.ai_subdevice,
            mode.ai_channel,
            mode.ai_units.clone(),
            mode.ai_conversion_factor,
        ),
        Direction::Output => (
            defaults.ao_subdevice,
            mode.ao_channel,
            mode.ao_units.clone(),
            mode.ao_conversion_factor,
        ),
    };
    Resolved {
        direction: descriptor.direction,
        subdevice: descriptor.subdevice.unwrap_or(subdevice),
        channel: descriptor.channel.unwrap_or(channel),
        units: descriptor.units.clone().unwrap_or(units),
        factor: descriptor.factor.unwrap_or(factor),
        reference: descriptor
            .reference
            .clone()
            .unwrap_or_else(|| defaults.ground_reference.clone()),
        range: descriptor
            .range
            .clone()
            .unwrap_or_else(|| defaults.range.clone()),
        stimfile: descriptor.stimfile.clone(),
        kernel_file: descriptor.kernel_file.clone(),
        offset: descriptor.offset,
        reset_output: descriptor.reset_output.unwrap_or(defaults.reset_output),
    }
}

fn analog_input(id: NodeId, resolved: &Resolved, defaults: &Defaults) -> Result<Node> {
    let mut params = Params::new();
    params.insert("deviceFile".into(), defaults.device.as_str().into());
    params.insert("inputSubdevice".into(), resolved.subdevice.into());
    params.insert("inputChannel".into(), resolved.channel.into());
    params.insert("inputConversionFactor".into(), resolved.factor.into());
    params.insert("range".into(), resolved.range.as_str().into());
    params.insert("aref".into(), resolved.reference.as_str().into());
    params.insert("units".into(), resolved.units.as_str().into());
    Node::with_params(id, NodeKind::AnalogInput, params)
}

fn analog_output(id: NodeId, resolved: &Resolved, defaults: &Defaults) -> Result<Node> {
    let mut params = Params::new();
    params.insert("deviceFile".into(), defaults.device.as_str().into());
    params.insert("outputSubdevice".into(), resolved.subdevice.into());
    params.insert("outputChannel".into(), resolved.channel.into());
    params.insert("outputConversionFactor".into(), resolved.factor.into());
    params.insert("aref".into(), resolved.reference.as_str().into());
    params.insert("units".into(), resolved.units.as_str().into());
    params.insert("resetOutput".into(), resolved.reset_output.into());
    Node::with_params(id, NodeKind::AnalogOutput, params)
}

fn stream_channel(id: NodeId, resolved: &Resolved, defaults: &Defaults, rate: f64) -> Result<Node> {
    let mut params = Params::new();
    params.insert("device".into(), defaults.device.as_str().into());
    params.insert("subdevice".into(), resolved.subdevice.into());
    params.insert("channel".into(), resolved.channel.into());
    params.insert("conversionFactor".into(), resolved.factor.into());
    if resolved.direction == Direction::Input {
        params.insert("range".into(), resolved.range.as_str().into());
    }
    params.insert("reference".into(), resolved.reference.as_str().into());
    params.insert("units".into(), resolved.units.as_str().into());
    params.insert("samplingRate".into(), rate.into());
    if resolved.direction == Direction::Output {
        params.insert("resetOutput".into(), resolved.reset_output.into());
        if let Some(stimfile) = &resolved.stimfile {
            params.insert("stimulusFile".into(), stimfile.as_str().into());
        }
    }
    if let Some(offset) = resolved.offset {
        params.insert("offset".into(), offset.into());
    }
    let kind = match resolved.direction {
        Direction::Input => NodeKind::InputChannel,
        Direction::Output => NodeKind::OutputChannel,
    };
    Node::with_params(id, kind, params)
}

/// Spike threshold and resting-potential priors handed to RealNeuron
/// nodes, in mV.
const SPIKE_THRESHOLD: f64 = -20.;
const RESTING_POTENTIAL: f64 = -65.;

fn real_neuron(
    id: NodeId,
    input: &Resolved,
    output: &Resolved,
    defaults: &Defaults,
) -> Result<Node> {
    let mut params = Params::new();
    params.insert("spikeThreshold".into(), SPIKE_THRESHOLD.into());
    params.insert("V0".into(), RESTING_POTENTIAL.into());
    params.insert("deviceFile".into(), defaults.device.as_str().into());
    params.insert("inputSubdevice".into(), input.subdevice.into());
    params.insert("outputSubdevice".into(), output.subdevice.into());
    params.insert("inputChannel".into(), input.channel.into());
    params.insert("outputChannel".into(), output.channel.into());
    params.insert("inputConversionFactor".into(), input.factor.into());
    params.insert("outputConversionFactor".into(), output.factor.into());
    params.insert("inputRange".into(), input.range.as_str().into());
    params.insert("reference".into(), input.reference.as_str().into());
    let mut node = Node::with_params(id, NodeKind::RealNeuron, params)?;
    if let Some(kernel) = &input.kernel_file {
        node.set_param("kernelFile", kernel.as_str())?;
    }
    Ok(node)
}

/// Builds the plain-I/O document. With `realtime`, each input channel
/// becomes an `AnalogInput` feeding the Recorder (identity 0) and each
/// output channel an `AnalogOutput` driven by a `WaveformPlayer`; without
/// it, channels become non-real-time `InputChannel`/`OutputChannel`
/// streams carrying the sampling rate themselves.
pub fn io_configuration(
    channels: &[ChannelDescriptor],
    realtime: bool,
    defaults: &Defaults,
    rate: f64,
    tend: f64,
) -> Result<Document> {
    let mut doc = Document::new(rate, tend);
    let mut ids = NodeIds::new();

    if realtime {
        let recorder = doc.add_entity(Node::recorder(ids.next(), true, None))?;
        for descriptor in channels {
            let resolved = resolve(descriptor, defaults);
            match resolved.direction {
                Direction::Input => {
                    let mut input = analog_input(ids.next(), &resolved, defaults)?;
                    input.connect(recorder);
                    doc.add_entity(input)?;
                }
                Direction::Output => {
                    let stimfile = resolved.stimfile.as_deref().ok_or_else(|| {
                        Error::Schema(format!(
                            "output channel {} has no stimulus file",
                            resolved.channel
                        ))
                    })?;
                    let output = doc.add_entity(analog_output(ids.next(), &resolved, defaults)?)?;
                    let mut player =
                        Node::waveform_player(ids.next(), stimfile, &resolved.units, false);
                    player.connect_all(&[recorder, output]);
                    doc.add_entity(player)?;
                }
            }
        }
    } else {
        for descriptor in channels {
            let resolved = resolve(descriptor, defaults);
            doc.add_stream(stream_channel(ids.next(), &resolved, defaults, rate)?)?;
        }
    }
    debug!(
        channels = channels.len(),
        realtime, "built I/O configuration"
    );
    Ok(doc)
}

/// Builds the conductance-stimulus document: each input/output channel
/// pair with its reversal potential becomes a `RealNeuron` driven by a
/// `ConductanceStimulus`, itself driven by a `WaveformPlayer` in nS
/// reading the pair's stimulus file. Listing the same output channel
/// twice stacks multiple conductances on one neuron. Unpaired channels
/// fall back to plain analog I/O nodes.
pub fn conductance_stimulus_configuration(
    channels: &[ChannelDescriptor],
    reversal_potentials: &[f64],
    defaults: &Defaults,
    rate: f64,
    tend: f64,
) -> Result<Document> {
    let mut doc = Document::new(rate, tend);
    let mut ids = NodeIds::new();
    let recorder = doc.add_entity(Node::recorder(ids.next(), true, None))?;

    let inputs: Vec<Resolved> = channels
        .iter()
        .filter(|c| c.direction == Direction::Input)
        .map(|c| resolve(c, defaults))
        .collect();
    let outputs: Vec<Resolved> = channels
        .iter()
        .filter(|c| c.direction == Direction::Output)
        .map(|c| resolve(c, defaults))
        .collect();

    let pairs = inputs.len().min(outputs.len());
    if reversal_potentials.len() < pairs {
        return Err(Error::Schema(format!(
            "{} channel pairs but only {} reversal potentials",
            pairs,
            reversal_potentials.len()
        )));
    }

    // Output channel number -> RealNeuron identity, so that a repeated
    // output channel reuses the neuron instead of duplicating it.
    let mut neurons: IndexMap<u32, NodeId> = IndexMap::new();

    for k in 0..pairs {
        let input = &inputs[k];
        let output = &outputs[k];
        let neuron = match neurons.get(&output.channel) {
            Some(id) => *id,
            None => {
                let mut node = real_neuron(ids.next(), input, output, defaults)?;
                node.connect(recorder);
                let id = doc.add_entity(node)?;
                neurons.insert(output.channel, id);
                id
            }
        };
        let stimfile = input
            .stimfile
            .as_deref()
            .or(output.stimfile.as_deref())
            .ok_or_else(|| {
                Error::Schema(format!(
                    "conductance pair {} has no stimulus file",
                    k
                ))
            })?;
        let mut player = Node::waveform_player(ids.next(), stimfile, "nS", false);
        let mut stimulus = Node::conductance_stimulus(ids.next(), reversal_potentials[k]);
        player.connect_all(&[recorder, stimulus.id()]);
        stimulus.connect_all(&[recorder, neuron]);
        doc.add_entity(player)?;
        doc.add_entity(stimulus)?;
    }

    for input in inputs.iter().skip(pairs) {
        let mut node = analog_input(ids.next(), input, defaults)?;
        node.connect(recorder);
        doc.add_entity(node)?;
    }
    for output in outputs.iter().skip(pairs) {
        doc.add_entity(analog_output(ids.next(), output, defaults)?)?;
    }
    debug!(pairs, "built conductance-stimulus configuration");
    Ok(doc)
}

/// A digital line read by an externally triggered protocol.
#[derive(Clone, PartialEq, Debug)]
pub struct DigitalChannel {
    pub channel: u32,
    pub subdevice: Option<u32>,
    pub event_to_send: Option<String>,
}

/// Builds the externally triggered I/O document: plain real-time I/O
/// plus the global trigger descriptor and one `DigitalInput` per digital
/// line. The line matching the trigger's stop channel sends `STOPRUN`.
pub fn external_trigger_configuration(
    channels: &[ChannelDescriptor],
    trigger: TriggerDescriptor,
    digital_channels: &[DigitalChannel],
    defaults: &Defaults,
    rate: f64,
    tend: f64,
) -> Result<Document> {
    let mut doc = io_configuration(channels, true, defaults, rate, tend)?;

    let mut next = 0;
    while doc.contains(next) {
        next += 1;
    }
    for digital in digital_channels {
        let mut params = Params::new();
        params.insert("deviceFile".into(), defaults.device.as_str().into());
        params.insert(
            "inputSubdevice".into(),
            digital.subdevice.unwrap_or(defaults.ai_subdevice).into(),
        );
        params.insert("inputChannel".into(), digital.channel.into());
        let event = digital.event_to_send.clone().or_else(|| {
            (trigger.stop_channel == Some(digital.channel)).then(|| "STOPRUN".to_string())
        });
        let mut node = Node::with_params(next, NodeKind::DigitalInput, params)?;
        if let Some(event) = event {
            node.set_param("eventToSend", event.as_str())?;
        }
        node.connect(0);
        doc.add_entity(node)?;
        next += 1;
    }
    doc.set_trigger(trigger);
    Ok(doc)
}
