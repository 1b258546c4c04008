//! Plan-graph serialization of dataset definitions.
//!
//! Each [`Dataset`](crate::dataset::Dataset) can describe itself as a node in a
//! [`Plan`] through a [`PlanBuilder`]: an op name, the nodes it reads from, its
//! scalar inputs and its attributes. Datasets only feed plain values to the
//! builder; rebuilding datasets from a plan is left to the host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a node within one [`Plan`]. Assigned sequentially.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct PlanNodeId(u64);

impl PlanNodeId {
    /// Return the underlying numeric value.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub op: String,
    pub inputs: Vec<PlanNodeId>,
    pub scalars: BTreeMap<String, PlanValue>,
    pub attrs: BTreeMap<String, PlanValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
    pub output: Option<PlanNodeId>,
}

impl Plan {
    #[must_use]
    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// # Errors
    ///
    /// Returns an error if the plan cannot be encoded.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
pub struct PlanBuilder {
    nodes: Vec<PlanNode>,
}

impl PlanBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dataset(
        &mut self,
        op: impl Into<String>,
        inputs: Vec<PlanNodeId>,
        scalars: Vec<(&str, PlanValue)>,
        attrs: Vec<(&str, PlanValue)>,
    ) -> PlanNodeId {
        let id = PlanNodeId(self.nodes.len() as u64);
        self.nodes.push(PlanNode {
            id,
            op: op.into(),
            inputs,
            scalars: scalars.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            attrs: attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        });
        id
    }

    #[must_use]
    pub fn finish(self, output: PlanNodeId) -> Plan {
        Plan {
            nodes: self.nodes,
            output: Some(output),
        }
    }
}
