//! The canvas collaborator.
//!
//! [`Canvas`] is the full surface the harness needs from NiFi: CRUD over
//! process groups, processors, ports, controller services and
//! connections, plus start/stop scheduling. Every call is a single
//! request/response; errors come back as [`CanvasError`] untouched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use nifitest_core::canvas::{CanvasNode, Connection, ConnectionSpec, NodeKind, ProcessorSpec};
use nifitest_core::error::CoreError;
use nifitest_core::location::Location;
use nifitest_core::types::NodeId;

/// Errors surfaced by a canvas implementation.
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// NiFi returned a non-2xx status code.
    #[error("NiFi API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The referenced component does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: NodeKind, id: NodeId },

    /// A handle or spec could not be mapped onto the canvas.
    #[error(transparent)]
    Model(#[from] CoreError),

    /// An asynchronous NiFi request (queue drop, service state change)
    /// did not settle in time.
    #[error("Timed out waiting for {0}")]
    Unsettled(String),
}

#[async_trait]
pub trait Canvas: Send + Sync {
    /// Id of the root process group.
    async fn root_group_id(&self) -> Result<NodeId, CanvasError>;

    async fn process_group(&self, id: &str) -> Result<CanvasNode, CanvasError>;

    async fn child_groups(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError>;

    async fn processors(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError>;

    async fn input_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError>;

    async fn output_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError>;

    /// Controller services scoped directly to `group_id` (not inherited
    /// from ancestors).
    async fn controller_services(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError>;

    /// Children of `group_id` of the given kind.
    async fn children(
        &self,
        group_id: &str,
        kind: NodeKind,
    ) -> Result<Vec<CanvasNode>, CanvasError> {
        match kind {
            NodeKind::ProcessGroup => self.child_groups(group_id).await,
            NodeKind::Processor => self.processors(group_id).await,
            NodeKind::InputPort => self.input_ports(group_id).await,
            NodeKind::OutputPort => self.output_ports(group_id).await,
            NodeKind::ControllerService => self.controller_services(group_id).await,
        }
    }

    async fn create_process_group(
        &self,
        parent_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError>;

    /// Delete a process group. With `force`, the group is stopped, its
    /// controller services disabled, its queues dropped and any
    /// connections crossing its boundary removed first.
    async fn delete_process_group(&self, group: &CanvasNode, force: bool)
        -> Result<(), CanvasError>;

    async fn create_processor(
        &self,
        group_id: &str,
        spec: &ProcessorSpec,
    ) -> Result<CanvasNode, CanvasError>;

    /// Merge `properties` into the processor's configuration.
    async fn update_processor_properties(
        &self,
        processor: &CanvasNode,
        properties: &BTreeMap<String, String>,
    ) -> Result<CanvasNode, CanvasError>;

    async fn create_input_port(
        &self,
        group_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError>;

    async fn create_output_port(
        &self,
        group_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError>;

    async fn create_controller_service(
        &self,
        group_id: &str,
        service_type: &str,
        name: &str,
    ) -> Result<CanvasNode, CanvasError>;

    async fn enable_controller_service(
        &self,
        service: &CanvasNode,
    ) -> Result<CanvasNode, CanvasError>;

    /// Connections in `group_id`, optionally including every descendant
    /// group.
    async fn list_connections(
        &self,
        group_id: &str,
        descendants: bool,
    ) -> Result<Vec<Connection>, CanvasError>;

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<Connection, CanvasError>;

    /// Delete a connection, dropping queued flowfiles first when `purge`.
    async fn delete_connection(
        &self,
        connection: &Connection,
        purge: bool,
    ) -> Result<(), CanvasError>;

    /// Start (`running == true`) or stop every component in a group.
    async fn schedule_process_group(
        &self,
        group_id: &str,
        running: bool,
    ) -> Result<(), CanvasError>;
}

/// Recreate a previously deleted connection. The result has a new id.
pub async fn recreate_connection(
    canvas: &dyn Canvas,
    connection: &Connection,
) -> Result<Connection, CanvasError> {
    canvas.create_connection(&connection.spec()).await
}

/// Delete every connection inside a process group.
///
/// Returns how many connections were removed.
pub async fn delete_all_connections(
    canvas: &dyn Canvas,
    group_id: &str,
    purge: bool,
    descendants: bool,
) -> Result<usize, CanvasError> {
    let connections = canvas.list_connections(group_id, descendants).await?;
    tracing::debug!(
        group_id,
        count = connections.len(),
        "Deleting all connections in process group"
    );
    for connection in &connections {
        canvas.delete_connection(connection, purge).await?;
    }
    Ok(connections.len())
}
