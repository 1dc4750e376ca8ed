//! NiFi REST entity shapes.
//!
//! Only the fields the harness reads are modelled; everything else in
//! NiFi's (large) entity documents is ignored on deserialization.

use std::collections::BTreeSet;

use nifitest_core::canvas::{CanvasNode, ConnectableKind, Connection, Endpoint, NodeKind};
use nifitest_core::error::CoreError;
use serde::{Deserialize, Serialize};

/// Optimistic-locking revision attached to every entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDto {
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl RevisionDto {
    pub fn at(version: i64) -> Self {
        Self {
            version,
            client_id: None,
        }
    }
}

/// Relationship advertised by a processor.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipDto {
    pub name: String,
}

/// Common component fields shared by groups, processors, ports and
/// controller services.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_group_id: Option<String>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDto>,
    /// Controller service state (`ENABLED`, `DISABLED`, ...).
    #[serde(default)]
    pub state: Option<String>,
}

/// Envelope for any single named component.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEntity {
    pub id: String,
    #[serde(default)]
    pub revision: RevisionDto,
    pub component: ComponentDto,
}

impl ComponentEntity {
    pub fn into_node(self, kind: NodeKind) -> CanvasNode {
        CanvasNode {
            id: self.id,
            name: self.component.name,
            kind,
            parent_group_id: self.component.parent_group_id,
            version: self.revision.version,
            relationships: self
                .component
                .relationships
                .into_iter()
                .map(|r| r.name)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroupsEntity {
    #[serde(default)]
    pub process_groups: Vec<ComponentEntity>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessorsEntity {
    #[serde(default)]
    pub processors: Vec<ComponentEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPortsEntity {
    #[serde(default)]
    pub input_ports: Vec<ComponentEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPortsEntity {
    #[serde(default)]
    pub output_ports: Vec<ComponentEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerServicesEntity {
    #[serde(default)]
    pub controller_services: Vec<ComponentEntity>,
}

/// One end of a connection as NiFi describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectableDto {
    pub id: String,
    pub group_id: String,
    #[serde(rename = "type")]
    pub kind: ConnectableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<ConnectableDto> for Endpoint {
    fn from(dto: ConnectableDto) -> Self {
        Endpoint {
            id: dto.id,
            group_id: dto.group_id,
            kind: dto.kind,
            name: dto.name,
        }
    }
}

impl From<&Endpoint> for ConnectableDto {
    fn from(ep: &Endpoint) -> Self {
        ConnectableDto {
            id: ep.id.clone(),
            group_id: ep.group_id.clone(),
            kind: ep.kind,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: ConnectableDto,
    pub destination: ConnectableDto,
    #[serde(default)]
    pub selected_relationships: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub revision: RevisionDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<ConnectableKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<ConnectableKind>,
    pub component: ConnectionDto,
}

impl ConnectionEntity {
    /// Convert to the core model. `fallback_group` is used when NiFi
    /// omits the component's parent group id.
    ///
    /// Fails when NiFi sent neither an entity nor a component id.
    pub fn into_connection(self, fallback_group: &str) -> Result<Connection, CoreError> {
        let id = self
            .id
            .or(self.component.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "connection in group {fallback_group} has no id"
                ))
            })?;
        Ok(Connection {
            id,
            version: self.revision.version,
            parent_group_id: self
                .component
                .parent_group_id
                .unwrap_or_else(|| fallback_group.to_string()),
            source: self.component.source.into(),
            destination: self.component.destination.into(),
            relationships: self.component.selected_relationships,
            name: self.component.name.filter(|n| !n.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectionsEntity {
    #[serde(default)]
    pub connections: Vec<ConnectionEntity>,
}

/// Status of an asynchronous queue drop.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRequestDto {
    pub id: String,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRequestEntity {
    pub drop_request: DropRequestDto,
}
