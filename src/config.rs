//! The configuration document: the declarative description of one trial
//! that the acquisition engine executes.
//!
//! ## Overview
//!
//! A [`Document`] owns a global simulation section (sampling rate, trial
//! duration, optional output-file hint, optional hardware trigger) and
//! two ordered node collections sharing one identity space: `entities`
//! (the real-time graph) and `streams` (non-real-time I/O endpoints).
//!
//! The graph may contain cycles — feedback paths such as frequency
//! estimator, controller, stimulus are routine — so connections are
//! stored as plain identity references and no traversal order exists.
//! Reference closure and identity uniqueness are checked when the
//! document is written; identity collisions are additionally rejected
//! the moment a node is added.
//!
//! The on-disk format is a JSON rendition of the logical tree
//! (`simulation` / `entities` / `streams`); connection lists serialize
//! as comma-separated identities and booleans as lower-case
//! `true`/`false`.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::json;
use tracing::debug;

use crate::entity::{Node, NodeId, NodeKind};
use crate::error::{Error, Result};

/// Hardware trigger descriptor for externally triggered protocols.
#[derive(Clone, PartialEq, Debug)]
pub struct TriggerDescriptor {
    pub device: String,
    pub subdevice: u32,
    pub channel: u32,
    pub stop_channel: Option<u32>,
}

/// Monotonic identity allocator. The canonical topologies give the
/// Recorder identity 0 by allocating it first.
#[derive(Default)]
pub struct NodeIds {
    next: NodeId,
}
impl NodeIds {
    pub fn new() -> NodeIds {
        NodeIds { next: 0 }
    }

    pub fn next(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// An experiment-graph document under construction.
#[derive(Debug)]
pub struct Document {
    rate: f64,
    tend: f64,
    outfile: Option<String>,
    trigger: Option<TriggerDescriptor>,
    entities: IndexMap<NodeId, Node>,
    streams: IndexMap<NodeId, Node>,
}

impl Document {
    pub fn new(rate: f64, tend: f64) -> Document {
        Document {
            rate,
            tend,
            outfile: None,
            trigger: None,
            entities: IndexMap::new(),
            streams: IndexMap::new(),
        }
    }

    pub fn with_outfile(mut self, outfile: &str) -> Document {
        self.outfile = Some(outfile.to_string());
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerDescriptor) -> Document {
        self.trigger = Some(trigger);
        self
    }

    pub fn set_trigger(&mut self, trigger: TriggerDescriptor) {
        self.trigger = Some(trigger);
    }

    /// Mutates the trial duration in place; used when one document is
    /// reused across chained trials.
    pub fn set_tend(&mut self, tend: f64) {
        self.tend = tend;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
    pub fn tend(&self) -> f64 {
        self.tend
    }
    pub fn trigger(&self) -> Option<&TriggerDescriptor> {
        self.trigger.as_ref()
    }
    pub fn entities(&self) -> impl Iterator<Item = &Node> {
        self.entities.values()
    }
    pub fn streams(&self) -> impl Iterator<Item = &Node> {
        self.streams.values()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entities.contains_key(&id) || self.streams.contains_key(&id)
    }

    pub fn entity(&self, id: NodeId) -> Option<&Node> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.entities.get_mut(&id)
    }

    /// Appends a real-time entity. The identity must be new across
    /// entities and streams.
    pub fn add_entity(&mut self, node: Node) -> Result<NodeId> {
        self.check_new_id(&node)?;
        let id = node.id();
        self.entities.insert(id, node);
        Ok(id)
    }

    /// Appends a non-real-time stream node.
    pub fn add_stream(&mut self, node: Node) -> Result<NodeId> {
        self.check_new_id(&node)?;
        let id = node.id();
        self.streams.insert(id, node);
        Ok(id)
    }

    fn check_new_id(&self, node: &Node) -> Result<()> {
        if self.contains(node.id()) {
            return Err(Error::Reference(format!(
                "identity {} of {} is already taken",
                node.id(),
                node.kind()
            )));
        }
        Ok(())
    }

    /// Checks the document invariants: every connection target resolves
    /// to an existing identity, and at most one Recorder is present.
    pub fn validate(&self) -> Result<()> {
        let mut recorders = 0;
        for node in self.entities.values().chain(self.streams.values()) {
            if node.kind() == NodeKind::Recorder {
                recorders += 1;
                if recorders > 1 {
                    return Err(Error::Reference(format!(
                        "more than one Recorder in the document (second has id {})",
                        node.id()
                    )));
                }
            }
            for target in node.connections() {
                if !self.contains(*target) {
                    return Err(Error::Reference(format!(
                        "{} (id {}) connects to unknown identity {}",
                        node.kind(),
                        node.id(),
                        target
                    )));
                }
            }
        }
        Ok(())
    }

    fn node_to_json(node: &Node) -> serde_json::Value {
        let mut parameters = serde_json::Map::new();
        for (key, value) in node.params() {
            parameters.insert(key.clone(), value.to_json());
        }
        let connections = node
            .connections()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<String>>()
            .join(",");
        json!({
            "name": node.kind().name(),
            "id": node.id(),
            "parameters": parameters,
            "connections": connections,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut simulation = serde_json::Map::new();
        simulation.insert("rate".to_string(), json!(self.rate));
        simulation.insert("tend".to_string(), json!(self.tend));
        if let Some(outfile) = &self.outfile {
            simulation.insert("outfile".to_string(), json!(outfile));
        }
        if let Some(trigger) = &self.trigger {
            let mut t = serde_json::Map::new();
            t.insert("device".to_string(), json!(trigger.device));
            t.insert("subdevice".to_string(), json!(trigger.subdevice));
            t.insert("channel".to_string(), json!(trigger.channel));
            if let Some(stop) = trigger.stop_channel {
                t.insert("stopChannel".to_string(), json!(stop));
            }
            simulation.insert("trigger".to_string(), serde_json::Value::Object(t));
        }
        json!({
            "simulation": simulation,
            "entities": self.entities.values().map(Document::node_to_json).collect::<Vec<_>>(),
            "streams": self.streams.values().map(Document::node_to_json).collect::<Vec<_>>(),
        })
    }

    /// Validates and writes the document.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        let mut file = File::create(path).map_err(|e| Error::io(path, e))?;
        let rendered = serde_json::to_string_pretty(&self.to_json())
            .expect("document JSON serialization cannot fail");
        file.write_all(rendered.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        file.write_all(b"\n").map_err(|e| Error::io(path, e))?;
        debug!(
            path = %path.display(),
            entities = self.entities.len(),
            streams = self.streams.len(),
            "wrote configuration document"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_collision_is_rejected_on_add() {
        let mut doc = Document::new(20000., 5.);
        doc.add_entity(Node::recorder(0, true, None)).unwrap();
        let err = doc
            .add_entity(Node::waveform_player(0, "a.stim", "pA", false))
            .unwrap_err();
        assert!(matches!(err, Error::Reference(_)));
    }

    #[test]
    fn dangling_connection_fails_validation() {
        let mut doc = Document::new(20000., 5.);
        let mut player = Node::waveform_player(1, "a.stim", "pA", false);
        player.connect(7);
        doc.add_entity(player).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("unknown identity 7"));
    }

    #[test]
    fn cycles_are_legal() {
        let mut doc = Document::new(20000., 5.);
        let mut estimator = Node::frequency_estimator(0, 0.1, 10.);
        estimator.connect(1);
        let mut pid = Node::pid(1, 0., 1., 0.1, 0.);
        pid.connect(0);
        doc.add_entity(estimator).unwrap();
        doc.add_entity(pid).unwrap();
        doc.validate().unwrap();
    }
}
