//! Node model for the experiment graph.
//!
//! Every real-time entity and every non-real-time stream in a
//! configuration document shares one narrow shape: a kind, a unique
//! integer identity, a bag of named parameters and an ordered list of
//! outbound connections. The per-kind parameter schema is enforced when
//! a node is built, not when the document is written, so an invalid node
//! never enters a document.
//!
//! Typed constructors ([`Node::recorder`], [`Node::waveform_player`],
//! [`Node::real_neuron`], ...) cover the kinds the canonical topologies
//! use; [`Node::with_params`] builds any kind from a raw parameter bag
//! and validates it against the schema table.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Identity of a node, unique across entities and streams of one
/// document. Non-negative by construction.
pub type NodeId = u32;

/// A parameter value at the document boundary: scalar or string.
/// Booleans serialize as lower-case `true`/`false`.
#[derive(Clone, PartialEq, Debug)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
        }
    }
}
impl ParamValue {
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(v) => serde_json::Value::from(*v),
            ParamValue::Float(v) => serde_json::Value::from(*v),
            ParamValue::Str(v) => serde_json::Value::from(v.as_str()),
            ParamValue::Bool(v) => serde_json::Value::from(*v),
        }
    }
}
impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}
impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}
impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}
impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}
impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

pub type Params = IndexMap<String, ParamValue>;

/// The fixed enumeration of node kinds understood by the engine.
/// `InputChannel` and `OutputChannel` are stream kinds; everything else
/// lives in the real-time graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    Recorder,
    TriggeredRecorder,
    WaveformPlayer,
    Ou,
    ConductanceStimulus,
    NmdaConductanceStimulus,
    LifNeuron,
    RealNeuron,
    AnalogInput,
    AnalogOutput,
    DigitalInput,
    SynapticConnection,
    ExponentialSynapse,
    Exp2Synapse,
    TmgSynapse,
    Pid,
    FrequencyEstimator,
    PeriodicTrigger,
    EventCounter,
    SobolDelay,
    Constant,
    HhSodium,
    HhPotassium,
    Hh2Sodium,
    Hh2Potassium,
    MCurrent,
    TCurrent,
    NoisyHhSodium,
    NoisyHhPotassium,
    InputChannel,
    OutputChannel,
}

impl NodeKind {
    /// The kind name as it appears in the document.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Recorder => "Recorder",
            NodeKind::TriggeredRecorder => "TriggeredRecorder",
            NodeKind::WaveformPlayer => "WaveformPlayer",
            NodeKind::Ou => "OU",
            NodeKind::ConductanceStimulus => "ConductanceStimulus",
            NodeKind::NmdaConductanceStimulus => "NMDAConductanceStimulus",
            NodeKind::LifNeuron => "LIFNeuron",
            NodeKind::RealNeuron => "RealNeuron",
            NodeKind::AnalogInput => "AnalogInput",
            NodeKind::AnalogOutput => "AnalogOutput",
            NodeKind::DigitalInput => "DigitalInput",
            NodeKind::SynapticConnection => "SynapticConnection",
            NodeKind::ExponentialSynapse => "ExponentialSynapse",
            NodeKind::Exp2Synapse => "Exp2Synapse",
            NodeKind::TmgSynapse => "TMGSynapse",
            NodeKind::Pid => "PID",
            NodeKind::FrequencyEstimator => "FrequencyEstimator",
            NodeKind::PeriodicTrigger => "PeriodicTrigger",
            NodeKind::EventCounter => "EventCounter",
            NodeKind::SobolDelay => "SobolDelay",
            NodeKind::Constant => "Constant",
            NodeKind::HhSodium => "HHSodium",
            NodeKind::HhPotassium => "HHPotassium",
            NodeKind::Hh2Sodium => "HH2Sodium",
            NodeKind::Hh2Potassium => "HH2Potassium",
            NodeKind::MCurrent => "MCurrent",
            NodeKind::TCurrent => "TCurrent",
            NodeKind::NoisyHhSodium => "NoisyHHSodium",
            NodeKind::NoisyHhPotassium => "NoisyHHPotassium",
            NodeKind::InputChannel => "InputChannel",
            NodeKind::OutputChannel => "OutputChannel",
        }
    }

    pub fn is_stream(self) -> bool {
        matches!(self, NodeKind::InputChannel | NodeKind::OutputChannel)
    }

    /// Required parameter names at the document boundary.
    fn required(self) -> &'static [&'static str] {
        match self {
            NodeKind::Recorder => &["compress"],
            NodeKind::TriggeredRecorder => &["before", "after", "compress"],
            NodeKind::WaveformPlayer => &["filename", "units", "triggered"],
            NodeKind::Ou => &[
                "mean",
                "stddev",
                "tau",
                "initialCondition",
                "units",
                "interval",
                "seed",
            ],
            NodeKind::ConductanceStimulus => &["E"],
            NodeKind::NmdaConductanceStimulus => &["E", "K1", "K2"],
            NodeKind::LifNeuron => &[
                "C",
                "tau",
                "tarp",
                "Er",
                "E0",
                "Vth",
                "Iext",
                "holdLastValue",
                "holdLastValueFilename",
            ],
            NodeKind::RealNeuron => &[
                "spikeThreshold",
                "V0",
                "deviceFile",
                "inputSubdevice",
                "outputSubdevice",
                "inputChannel",
                "outputChannel",
                "inputConversionFactor",
                "outputConversionFactor",
                "inputRange",
                "reference",
            ],
            NodeKind::AnalogInput => &[
                "deviceFile",
                "inputSubdevice",
                "inputChannel",
                "inputConversionFactor",
                "range",
                "aref",
                "units",
            ],
            NodeKind::AnalogOutput => &[
                "deviceFile",
                "outputSubdevice",
                "outputChannel",
                "outputConversionFactor",
                "aref",
                "units",
                "resetOutput",
            ],
            NodeKind::DigitalInput => &["deviceFile", "inputSubdevice", "inputChannel"],
            NodeKind::SynapticConnection => &["delay", "weight"],
            NodeKind::ExponentialSynapse => &["E", "tau"],
            NodeKind::Exp2Synapse => &["E", "tauRise", "tauDecay"],
            NodeKind::TmgSynapse => &["E", "U", "tau1", "tau_rec", "tau_facil"],
            NodeKind::Pid => &["baselineCurrent", "gp", "gi", "gd"],
            NodeKind::FrequencyEstimator => &["tau", "initialFrequency"],
            NodeKind::PeriodicTrigger => &["frequency"],
            NodeKind::EventCounter => &["maxCount", "autoReset", "eventToCount", "eventToSend"],
            NodeKind::SobolDelay => &["startSample", "min", "max"],
            NodeKind::Constant => &["value", "units"],
            NodeKind::HhSodium
            | NodeKind::HhPotassium
            | NodeKind::Hh2Sodium
            | NodeKind::Hh2Potassium
            | NodeKind::MCurrent
            | NodeKind::TCurrent
            | NodeKind::NoisyHhSodium
            | NodeKind::NoisyHhPotassium => &["area", "gbar", "E"],
            NodeKind::InputChannel => &[
                "device",
                "subdevice",
                "channel",
                "conversionFactor",
                "range",
                "reference",
                "units",
                "samplingRate",
            ],
            NodeKind::OutputChannel => &[
                "device",
                "subdevice",
                "channel",
                "conversionFactor",
                "reference",
                "units",
                "samplingRate",
                "resetOutput",
            ],
        }
    }

    /// Optional parameter names accepted in addition to the required
    /// set.
    fn optional(self) -> &'static [&'static str] {
        match self {
            NodeKind::Recorder | NodeKind::TriggeredRecorder => &["filename"],
            NodeKind::RealNeuron => &[
                "kernelFile",
                "holdLastValue",
                "holdLastValueFilename",
                "adaptiveThreshold",
            ],
            NodeKind::DigitalInput => &["units", "eventToSend"],
            NodeKind::PeriodicTrigger => &["delay", "tend"],
            NodeKind::HhSodium | NodeKind::HhPotassium => &["vtraub"],
            NodeKind::Hh2Sodium | NodeKind::Hh2Potassium => &["vtraub", "temperature"],
            NodeKind::MCurrent => &["taumax", "temperature", "q10"],
            NodeKind::TCurrent => &["q10", "shift"],
            NodeKind::NoisyHhSodium | NodeKind::NoisyHhPotassium => &["vtraub", "seed"],
            NodeKind::InputChannel => &["offset"],
            NodeKind::OutputChannel => &["offset", "stimulusFile"],
            _ => &[],
        }
    }
}
impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One node of the experiment graph: kind, identity, parameter bag and
/// outbound connection list. Connection entries are non-owning identity
/// references; the document resolves them at write time.
#[derive(Clone, PartialEq, Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    params: Params,
    connections: Vec<NodeId>,
}

impl Node {
    /// Builds a node of any kind from a raw parameter bag, validating it
    /// against the kind's schema: every required key present, no key
    /// outside the required and optional sets.
    pub fn with_params(id: NodeId, kind: NodeKind, params: Params) -> Result<Node> {
        for key in kind.required() {
            if !params.contains_key(*key) {
                return Err(Error::Schema(format!(
                    "{} (id {}) is missing required parameter '{}'",
                    kind, id, key
                )));
            }
        }
        for key in params.keys() {
            if !kind.required().contains(&key.as_str())
                && !kind.optional().contains(&key.as_str())
            {
                return Err(Error::Schema(format!(
                    "{} (id {}) has unknown parameter '{}'",
                    kind, id, key
                )));
            }
        }
        Ok(Node {
            id,
            kind,
            params,
            connections: Vec::new(),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
    pub fn kind(&self) -> NodeKind {
        self.kind
    }
    pub fn params(&self) -> &Params {
        &self.params
    }
    pub fn connections(&self) -> &[NodeId] {
        &self.connections
    }
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Appends a connection target. Duplicates are allowed (the list is
    /// an ordered multiset); resolution happens at document write time.
    pub fn connect(&mut self, target: NodeId) -> &mut Node {
        self.connections.push(target);
        self
    }

    pub fn connect_all(&mut self, targets: &[NodeId]) -> &mut Node {
        self.connections.extend_from_slice(targets);
        self
    }

    /// Sets an optional parameter after construction; the key must
    /// belong to the kind's schema.
    pub fn set_param(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        if !self.kind.required().contains(&key) && !self.kind.optional().contains(&key) {
            return Err(Error::Schema(format!(
                "{} (id {}) has unknown parameter '{}'",
                self.kind, self.id, key
            )));
        }
        self.params.insert(key.to_string(), value.into());
        Ok(())
    }

    // Typed constructors. Each enforces the schema by signature, so they
    // build the parameter bag directly.

    pub fn recorder(id: NodeId, compress: bool, filename: Option<&str>) -> Node {
        let mut params = Params::new();
        params.insert("compress".into(), compress.into());
        if let Some(filename) = filename {
            params.insert("filename".into(), filename.into());
        }
        Node {
            id,
            kind: NodeKind::Recorder,
            params,
            connections: Vec::new(),
        }
    }

    pub fn triggered_recorder(
        id: NodeId,
        before: f64,
        after: f64,
        compress: bool,
        filename: Option<&str>,
    ) -> Node {
        let mut params = Params::new();
        params.insert("before".into(), before.into());
        params.insert("after".into(), after.into());
        params.insert("compress".into(), compress.into());
        if let Some(filename) = filename {
            params.insert("filename".into(), filename.into());
        }
        Node {
            id,
            kind: NodeKind::TriggeredRecorder,
            params,
            connections: Vec::new(),
        }
    }

    pub fn waveform_player(id: NodeId, filename: &str, units: &str, triggered: bool) -> Node {
        let mut params = Params::new();
        params.insert("filename".into(), filename.into());
        params.insert("units".into(), units.into());
        params.insert("triggered".into(), triggered.into());
        Node {
            id,
            kind: NodeKind::WaveformPlayer,
            params,
            connections: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ou(
        id: NodeId,
        mean: f64,
        stddev: f64,
        tau: f64,
        initial_condition: f64,
        units: &str,
        interval: (f64, f64),
        seed: u64,
    ) -> Node {
        let mut params = Params::new();
        params.insert("mean".into(), mean.into());
        params.insert("stddev".into(), stddev.into());
        params.insert("tau".into(), tau.into());
        params.insert("initialCondition".into(), initial_condition.into());
        params.insert("units".into(), units.into());
        params.insert(
            "interval".into(),
            format!("{},{}", interval.0, interval.1).into(),
        );
        params.insert("seed".into(), (seed as i64).into());
        Node {
            id,
            kind: NodeKind::Ou,
            params,
            connections: Vec::new(),
        }
    }

    pub fn conductance_stimulus(id: NodeId, e_rev: f64) -> Node {
        let mut params = Params::new();
        params.insert("E".into(), e_rev.into());
        Node {
            id,
            kind: NodeKind::ConductanceStimulus,
            params,
            connections: Vec::new(),
        }
    }

    pub fn nmda_conductance_stimulus(id: NodeId, e_rev: f64, k1: f64, k2: f64) -> Node {
        let mut params = Params::new();
        params.insert("E".into(), e_rev.into());
        params.insert("K1".into(), k1.into());
        params.insert("K2".into(), k2.into());
        Node {
            id,
            kind: NodeKind::NmdaConductanceStimulus,
            params,
            connections: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn lif_neuron(
        id: NodeId,
        c: f64,
        tau: f64,
        tarp: f64,
        e_reset: f64,
        e_rest: f64,
        v_threshold: f64,
        i_external: f64,
        hold_last_value: bool,
        hold_last_value_filename: &str,
    ) -> Node {
        let mut params = Params::new();
        params.insert("C".into(), c.into());
        params.insert("tau".into(), tau.into());
        params.insert("tarp".into(), tarp.into());
        params.insert("Er".into(), e_reset.into());
        params.insert("E0".into(), e_rest.into());
        params.insert("Vth".into(), v_threshold.into());
        params.insert("Iext".into(), i_external.into());
        params.insert("holdLastValue".into(), hold_last_value.into());
        params.insert("holdLastValueFilename".into(), hold_last_value_filename.into());
        Node {
            id,
            kind: NodeKind::LifNeuron,
            params,
            connections: Vec::new(),
        }
    }

    pub fn synaptic_connection(id: NodeId, delay: f64, weight: f64) -> Node {
        let mut params = Params::new();
        params.insert("delay".into(), delay.into());
        params.insert("weight".into(), weight.into());
        Node {
            id,
            kind: NodeKind::SynapticConnection,
            params,
            connections: Vec::new(),
        }
    }

    pub fn exponential_synapse(id: NodeId, e_rev: f64, tau: f64) -> Node {
        let mut params = Params::new();
        params.insert("E".into(), e_rev.into());
        params.insert("tau".into(), tau.into());
        Node {
            id,
            kind: NodeKind::ExponentialSynapse,
            params,
            connections: Vec::new(),
        }
    }

    pub fn exp2_synapse(id: NodeId, e_rev: f64, tau_rise: f64, tau_decay: f64) -> Node {
        let mut params = Params::new();
        params.insert("E".into(), e_rev.into());
        params.insert("tauRise".into(), tau_rise.into());
        params.insert("tauDecay".into(), tau_decay.into());
        Node {
            id,
            kind: NodeKind::Exp2Synapse,
            params,
            connections: Vec::new(),
        }
    }

    pub fn tmg_synapse(
        id: NodeId,
        e_rev: f64,
        u: f64,
        tau1: f64,
        tau_rec: f64,
        tau_facil: f64,
    ) -> Node {
        let mut params = Params::new();
        params.insert("E".into(), e_rev.into());
        params.insert("U".into(), u.into());
        params.insert("tau1".into(), tau1.into());
        params.insert("tau_rec".into(), tau_rec.into());
        params.insert("tau_facil".into(), tau_facil.into());
        Node {
            id,
            kind: NodeKind::TmgSynapse,
            params,
            connections: Vec::new(),
        }
    }

    pub fn pid(id: NodeId, baseline_current: f64, gp: f64, gi: f64, gd: f64) -> Node {
        let mut params = Params::new();
        params.insert("baselineCurrent".into(), baseline_current.into());
        params.insert("gp".into(), gp.into());
        params.insert("gi".into(), gi.into());
        params.insert("gd".into(), gd.into());
        Node {
            id,
            kind: NodeKind::Pid,
            params,
            connections: Vec::new(),
        }
    }

    pub fn frequency_estimator(id: NodeId, tau: f64, initial_frequency: f64) -> Node {
        let mut params = Params::new();
        params.insert("tau".into(), tau.into());
        params.insert("initialFrequency".into(), initial_frequency.into());
        Node {
            id,
            kind: NodeKind::FrequencyEstimator,
            params,
            connections: Vec::new(),
        }
    }

    pub fn periodic_trigger(id: NodeId, frequency: f64) -> Node {
        let mut params = Params::new();
        params.insert("frequency".into(), frequency.into());
        Node {
            id,
            kind: NodeKind::PeriodicTrigger,
            params,
            connections: Vec::new(),
        }
    }

    pub fn event_counter(
        id: NodeId,
        max_count: u32,
        auto_reset: bool,
        event_to_count: &str,
        event_to_send: &str,
    ) -> Node {
        let mut params = Params::new();
        params.insert("maxCount".into(), max_count.into());
        params.insert("autoReset".into(), auto_reset.into());
        params.insert("eventToCount".into(), event_to_count.into());
        params.insert("eventToSend".into(), event_to_send.into());
        Node {
            id,
            kind: NodeKind::EventCounter,
            params,
            connections: Vec::new(),
        }
    }

    pub fn sobol_delay(id: NodeId, start_sample: u32, min: f64, max: f64) -> Node {
        let mut params = Params::new();
        params.insert("startSample".into(), start_sample.into());
        params.insert("min".into(), min.into());
        params.insert("max".into(), max.into());
        Node {
            id,
            kind: NodeKind::SobolDelay,
            params,
            connections: Vec::new(),
        }
    }

    pub fn constant(id: NodeId, value: f64, units: &str) -> Node {
        let mut params = Params::new();
        params.insert("value".into(), value.into());
        params.insert("units".into(), units.into());
        Node {
            id,
            kind: NodeKind::Constant,
            params,
            connections: Vec::new(),
        }
    }

    /// Ionic-current node (`HHSodium`, `MCurrent`, ...). Kind-specific
    /// extras (`vtraub`, `temperature`, `q10`, ...) go through
    /// [`Node::set_param`].
    pub fn ionic_current(id: NodeId, kind: NodeKind, area: f64, gbar: f64, e_rev: f64) -> Result<Node> {
        match kind {
            NodeKind::HhSodium
            | NodeKind::HhPotassium
            | NodeKind::Hh2Sodium
            | NodeKind::Hh2Potassium
            | NodeKind::MCurrent
            | NodeKind::TCurrent
            | NodeKind::NoisyHhSodium
            | NodeKind::NoisyHhPotassium => {}
            other => {
                return Err(Error::Schema(format!(
                    "{} is not an ionic-current kind",
                    other
                )))
            }
        }
        let mut params = Params::new();
        params.insert("area".into(), area.into());
        params.insert("gbar".into(), gbar.into());
        params.insert("E".into(), e_rev.into());
        Ok(Node {
            id,
            kind,
            params,
            connections: Vec::new(),
        })
    }
}
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{}(id {}, {{{}}})", self.kind, self.id, params)
    }
}
