//! Canvas handle types.
//!
//! NiFi owns every entity on the canvas; the harness only holds
//! handles to them. [`CanvasNode`] covers process groups, processors,
//! ports and controller services. [`Connection`] is kept separate
//! because the harness has to be able to delete one and rebuild it
//! later from its [`ConnectionSpec`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::location::Location;
use crate::types::{NodeId, Revision};

// ---------------------------------------------------------------------------
// Component type constants
// ---------------------------------------------------------------------------

/// Fully-qualified NiFi processor types used by the scaffold.
pub mod processor_types {
    pub const HANDLE_HTTP_REQUEST: &str = "org.apache.nifi.processors.standard.HandleHttpRequest";
    pub const HANDLE_HTTP_RESPONSE: &str =
        "org.apache.nifi.processors.standard.HandleHttpResponse";
    pub const UPDATE_ATTRIBUTE: &str = "org.apache.nifi.processors.attributes.UpdateAttribute";
    pub const ROUTE_ON_ATTRIBUTE: &str = "org.apache.nifi.processors.standard.RouteOnAttribute";
    pub const REPLACE_TEXT: &str = "org.apache.nifi.processors.standard.ReplaceText";
    pub const MERGE_CONTENT: &str = "org.apache.nifi.processors.standard.MergeContent";
}

/// Fully-qualified NiFi controller service types used by the scaffold.
pub mod controller_types {
    pub const STANDARD_HTTP_CONTEXT_MAP: &str = "org.apache.nifi.http.StandardHttpContextMap";
}

/// Relationship names referenced when wiring the scaffold.
pub mod relationships {
    pub const SUCCESS: &str = "success";
    pub const FAILURE: &str = "failure";
    pub const UNMATCHED: &str = "unmatched";
    pub const ORIGINAL: &str = "original";
    pub const MERGED: &str = "merged";
}

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// The kinds of named component that can live inside a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    ProcessGroup,
    Processor,
    InputPort,
    OutputPort,
    ControllerService,
}

impl NodeKind {
    /// All recognised kinds.
    pub const ALL: [NodeKind; 5] = [
        NodeKind::ProcessGroup,
        NodeKind::Processor,
        NodeKind::InputPort,
        NodeKind::OutputPort,
        NodeKind::ControllerService,
    ];

    /// NiFi's wire name for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::ProcessGroup => "PROCESS_GROUP",
            NodeKind::Processor => "PROCESSOR",
            NodeKind::InputPort => "INPUT_PORT",
            NodeKind::OutputPort => "OUTPUT_PORT",
            NodeKind::ControllerService => "CONTROLLER_SERVICE",
        }
    }

    /// Two-letter tag used in listings.
    pub fn short_label(&self) -> &'static str {
        match self {
            NodeKind::ProcessGroup => "PG",
            NodeKind::Processor => "Pr",
            NodeKind::InputPort => "IP",
            NodeKind::OutputPort => "OP",
            NodeKind::ControllerService => "CS",
        }
    }

    /// The connectable type for this kind, if flowfiles can enter or
    /// leave it through a connection.
    pub fn connectable(&self) -> Option<ConnectableKind> {
        match self {
            NodeKind::Processor => Some(ConnectableKind::Processor),
            NodeKind::InputPort => Some(ConnectableKind::InputPort),
            NodeKind::OutputPort => Some(ConnectableKind::OutputPort),
            NodeKind::ProcessGroup | NodeKind::ControllerService => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint types a connection may attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectableKind {
    Processor,
    InputPort,
    OutputPort,
    Funnel,
    RemoteInputPort,
    RemoteOutputPort,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Handle to a NiFi component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// `None` only for the root process group.
    pub parent_group_id: Option<NodeId>,
    /// Revision at the time the handle was fetched.
    pub version: Revision,
    /// Relationship names offered by a processor. Empty for other kinds.
    #[serde(default)]
    pub relationships: Vec<String>,
}

impl CanvasNode {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            parent_group_id: None,
            version: 0,
            relationships: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_group_id: impl Into<NodeId>) -> Self {
        self.parent_group_id = Some(parent_group_id.into());
        self
    }

    pub fn with_version(mut self, version: Revision) -> Self {
        self.version = version;
        self
    }

    pub fn with_relationships<I, S>(mut self, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships = relationships.into_iter().map(Into::into).collect();
        self
    }

    /// Describe this node as a connection endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, CoreError> {
        let kind = self.kind.connectable().ok_or_else(|| CoreError::NotConnectable {
            kind: self.kind,
            name: self.name.clone(),
        })?;
        let group_id = self
            .parent_group_id
            .clone()
            .ok_or_else(|| CoreError::Orphan(self.name.clone()))?;

        Ok(Endpoint {
            id: self.id.clone(),
            group_id,
            kind,
            name: Some(self.name.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// One side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: NodeId,
    /// Process group that directly contains the endpoint.
    pub group_id: NodeId,
    pub kind: ConnectableKind,
    #[serde(default)]
    pub name: Option<String>,
}

/// Everything needed to (re)create a connection. Carries no id: NiFi
/// assigns a fresh one on every create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub parent_group_id: NodeId,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub relationships: BTreeSet<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ConnectionSpec {
    /// Build a spec connecting `source` to `destination`.
    ///
    /// The owning process group is the shared parent when both sit in the
    /// same group. An output port leaving a child group connects in the
    /// destination's group; an input port entering a child group connects
    /// in the source's group.
    ///
    /// With `relationships == None` a processor source routes all of its
    /// relationships; port sources have none.
    pub fn between(
        source: &CanvasNode,
        destination: &CanvasNode,
        relationships: Option<&[&str]>,
    ) -> Result<Self, CoreError> {
        let source_ep = source.endpoint()?;
        let destination_ep = destination.endpoint()?;

        let parent_group_id = if source_ep.group_id == destination_ep.group_id {
            source_ep.group_id.clone()
        } else if source.kind == NodeKind::OutputPort {
            destination_ep.group_id.clone()
        } else if destination.kind == NodeKind::InputPort {
            source_ep.group_id.clone()
        } else {
            return Err(CoreError::Validation(format!(
                "cannot connect {} in group {} to {} in group {}",
                source.name, source_ep.group_id, destination.name, destination_ep.group_id
            )));
        };

        let relationships = match relationships {
            Some(names) => names.iter().map(|s| s.to_string()).collect(),
            None if source.kind == NodeKind::Processor => {
                source.relationships.iter().cloned().collect()
            }
            None => BTreeSet::new(),
        };

        Ok(Self {
            parent_group_id,
            source: source_ep,
            destination: destination_ep,
            relationships,
            name: None,
        })
    }

    /// Identity-free comparison key: source, destination and labels.
    pub fn wiring(&self) -> (&str, &str, &BTreeSet<String>) {
        (&self.source.id, &self.destination.id, &self.relationships)
    }
}

/// A live connection on the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: NodeId,
    pub version: Revision,
    pub parent_group_id: NodeId,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub relationships: BTreeSet<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Connection {
    /// Materialize a spec with the identity NiFi assigned to it.
    pub fn from_spec(id: impl Into<NodeId>, version: Revision, spec: ConnectionSpec) -> Self {
        Self {
            id: id.into(),
            version,
            parent_group_id: spec.parent_group_id,
            source: spec.source,
            destination: spec.destination,
            relationships: spec.relationships,
            name: spec.name,
        }
    }

    /// The recipe for recreating this connection after deletion.
    pub fn spec(&self) -> ConnectionSpec {
        ConnectionSpec {
            parent_group_id: self.parent_group_id.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            relationships: self.relationships.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether flowfiles arrive at `node_id` through this connection.
    pub fn feeds(&self, node_id: &str) -> bool {
        self.destination.id == node_id
    }

    /// Whether flowfiles leave `node_id` through this connection.
    pub fn drains(&self, node_id: &str) -> bool {
        self.source.id == node_id
    }
}

// ---------------------------------------------------------------------------
// Processor creation
// ---------------------------------------------------------------------------

/// Description of a processor to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    pub processor_type: String,
    pub name: String,
    pub position: Location,
    pub properties: BTreeMap<String, String>,
    pub auto_terminated_relationships: BTreeSet<String>,
}

impl ProcessorSpec {
    pub fn new(processor_type: &str, name: impl Into<String>, position: Location) -> Self {
        Self {
            processor_type: processor_type.to_string(),
            name: name.into(),
            position,
            properties: BTreeMap::new(),
            auto_terminated_relationships: BTreeSet::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn auto_terminate(mut self, relationship: &str) -> Self {
        self.auto_terminated_relationships
            .insert(relationship.to_string());
        self
    }
}
