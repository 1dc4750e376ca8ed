//! REST client for the NiFi HTTP API.
//!
//! [`NifiApi`] implements [`Canvas`] against `<host>/nifi-api` using
//! [`reqwest`]. Requests that change a component carry the revision
//! NiFi expects; deletes re-read the current revision first so stale
//! handles do not trip optimistic locking.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use nifitest_core::canvas::{CanvasNode, Connection, ConnectionSpec, NodeKind, ProcessorSpec};
use nifitest_core::location::Location;
use nifitest_core::types::NodeId;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::canvas::{Canvas, CanvasError};
use crate::config::NifiConfig;
use crate::dto::{
    ComponentEntity, ConnectableDto, ConnectionDto, ConnectionEntity, ConnectionsEntity,
    ControllerServicesEntity, DropRequestEntity, InputPortsEntity, OutputPortsEntity,
    ProcessGroupsEntity, ProcessorsEntity, RevisionDto,
};

/// Delay between polls of an asynchronous NiFi request.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polls before an asynchronous NiFi request is considered stuck.
const MAX_POLLS: u32 = 40;

/// HTTP client for a single NiFi instance.
pub struct NifiApi {
    client: reqwest::Client,
    api_url: String,
}

impl NifiApi {
    /// Create a client from configuration, applying its request timeout.
    pub fn new(config: &NifiConfig) -> Result<Self, CanvasError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_base(),
        })
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    ///
    /// * `api_url` - REST base URL, e.g. `http://host:8080/nifi-api`.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CanvasError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::parse_response(response).await
    }

    async fn post_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CanvasError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::parse_response(response).await
    }

    async fn put_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CanvasError> {
        let response = self.client.put(self.url(path)).json(body).send().await?;
        Self::parse_response(response).await
    }

    async fn delete_at(&self, path: &str, version: i64) -> Result<(), CanvasError> {
        let response = self
            .client
            .delete(self.url(path))
            .query(&[("version", version)])
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn create_component(
        &self,
        path: &str,
        kind: NodeKind,
        body: serde_json::Value,
    ) -> Result<CanvasNode, CanvasError> {
        let entity: ComponentEntity = self.post_json(path, &body).await?;
        let node = entity.into_node(kind);
        tracing::debug!(id = %node.id, name = %node.name, %kind, "Created component");
        Ok(node)
    }

    async fn list_components<T, F>(
        &self,
        path: &str,
        kind: NodeKind,
        extract: F,
    ) -> Result<Vec<CanvasNode>, CanvasError>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> Vec<ComponentEntity>,
    {
        let listing: T = self.get_json(path).await?;
        Ok(extract(listing)
            .into_iter()
            .map(|e| e.into_node(kind))
            .collect())
    }

    /// Drop every queued flowfile on a connection and wait for NiFi to
    /// finish the drop.
    async fn drop_queue(&self, connection_id: &str) -> Result<(), CanvasError> {
        let base = format!("/flowfile-queues/{connection_id}/drop-requests");
        let mut request: DropRequestEntity = self.post_json(&base, &json!({})).await?;
        let drop_id = request.drop_request.id.clone();

        let mut polls = 0;
        while !request.drop_request.finished {
            if polls >= MAX_POLLS {
                return Err(CanvasError::Unsettled(format!(
                    "drop request {drop_id} on connection {connection_id}"
                )));
            }
            polls += 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            request = self.get_json(&format!("{base}/{drop_id}")).await?;
        }

        let response = self
            .client
            .delete(self.url(&format!("{base}/{drop_id}")))
            .send()
            .await?;
        if let Err(e) = Self::check_status(response).await {
            tracing::warn!(connection_id, drop_id = %drop_id, error = %e, "Failed to clear drop request");
        }
        Ok(())
    }

    /// Change a controller service's run status and wait until NiFi
    /// reports the target state.
    async fn set_service_state(
        &self,
        service: &CanvasNode,
        state: &str,
    ) -> Result<CanvasNode, CanvasError> {
        let path = format!("/controller-services/{}", service.id);
        let current: ComponentEntity = self.get_json(&path).await?;
        let body = json!({
            "revision": RevisionDto::at(current.revision.version),
            "state": state,
        });
        let mut entity: ComponentEntity = self
            .put_json(&format!("{path}/run-status"), &body)
            .await?;

        let mut polls = 0;
        while entity.component.state.as_deref() != Some(state) {
            if polls >= MAX_POLLS {
                return Err(CanvasError::Unsettled(format!(
                    "controller service {} to become {state}",
                    service.name
                )));
            }
            polls += 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            entity = self.get_json(&path).await?;
        }

        Ok(entity.into_node(NodeKind::ControllerService))
    }

    /// Ensure the response has a success status code, or turn it into
    /// [`CanvasError::Api`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CanvasError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CanvasError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CanvasError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), CanvasError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Canvas for NifiApi {
    async fn root_group_id(&self) -> Result<NodeId, CanvasError> {
        let root: ComponentEntity = self.get_json("/process-groups/root").await?;
        Ok(root.id)
    }

    async fn process_group(&self, id: &str) -> Result<CanvasNode, CanvasError> {
        let entity: ComponentEntity = self.get_json(&format!("/process-groups/{id}")).await?;
        Ok(entity.into_node(NodeKind::ProcessGroup))
    }

    async fn child_groups(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        self.list_components(
            &format!("/process-groups/{group_id}/process-groups"),
            NodeKind::ProcessGroup,
            |l: ProcessGroupsEntity| l.process_groups,
        )
        .await
    }

    async fn processors(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        self.list_components(
            &format!("/process-groups/{group_id}/processors"),
            NodeKind::Processor,
            |l: ProcessorsEntity| l.processors,
        )
        .await
    }

    async fn input_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        self.list_components(
            &format!("/process-groups/{group_id}/input-ports"),
            NodeKind::InputPort,
            |l: InputPortsEntity| l.input_ports,
        )
        .await
    }

    async fn output_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        self.list_components(
            &format!("/process-groups/{group_id}/output-ports"),
            NodeKind::OutputPort,
            |l: OutputPortsEntity| l.output_ports,
        )
        .await
    }

    async fn controller_services(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        // The flow endpoint also returns services inherited from ancestors.
        let services = self
            .list_components(
                &format!("/flow/process-groups/{group_id}/controller-services"),
                NodeKind::ControllerService,
                |l: ControllerServicesEntity| l.controller_services,
            )
            .await?;
        Ok(services
            .into_iter()
            .filter(|s| s.parent_group_id.as_deref() == Some(group_id))
            .collect())
    }

    async fn create_process_group(
        &self,
        parent_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        self.create_component(
            &format!("/process-groups/{parent_id}/process-groups"),
            NodeKind::ProcessGroup,
            json!({
                "revision": RevisionDto::at(0),
                "component": { "name": name, "position": position },
            }),
        )
        .await
    }

    async fn delete_process_group(
        &self,
        group: &CanvasNode,
        force: bool,
    ) -> Result<(), CanvasError> {
        if force {
            self.schedule_process_group(&group.id, false).await?;

            for service in self.controller_services(&group.id).await? {
                self.set_service_state(&service, "DISABLED").await?;
            }

            if let Some(parent_id) = &group.parent_group_id {
                let crossing = self
                    .list_connections(parent_id, false)
                    .await?
                    .into_iter()
                    .filter(|c| c.source.group_id == group.id || c.destination.group_id == group.id);
                for connection in crossing {
                    self.delete_connection(&connection, true).await?;
                }
            }

            for connection in self.list_connections(&group.id, true).await? {
                self.drop_queue(&connection.id).await?;
            }
        }

        let path = format!("/process-groups/{}", group.id);
        let current: ComponentEntity = self.get_json(&path).await?;
        self.delete_at(&path, current.revision.version).await?;
        tracing::debug!(id = %group.id, name = %group.name, "Deleted process group");
        Ok(())
    }

    async fn create_processor(
        &self,
        group_id: &str,
        spec: &ProcessorSpec,
    ) -> Result<CanvasNode, CanvasError> {
        self.create_component(
            &format!("/process-groups/{group_id}/processors"),
            NodeKind::Processor,
            json!({
                "revision": RevisionDto::at(0),
                "component": {
                    "type": spec.processor_type,
                    "name": spec.name,
                    "position": spec.position,
                    "config": {
                        "properties": spec.properties,
                        "autoTerminatedRelationships": spec.auto_terminated_relationships,
                    },
                },
            }),
        )
        .await
    }

    async fn update_processor_properties(
        &self,
        processor: &CanvasNode,
        properties: &BTreeMap<String, String>,
    ) -> Result<CanvasNode, CanvasError> {
        let path = format!("/processors/{}", processor.id);
        let current: ComponentEntity = self.get_json(&path).await?;
        let body = json!({
            "revision": RevisionDto::at(current.revision.version),
            "component": {
                "id": processor.id,
                "config": { "properties": properties },
            },
        });
        let entity: ComponentEntity = self.put_json(&path, &body).await?;
        Ok(entity.into_node(NodeKind::Processor))
    }

    async fn create_input_port(
        &self,
        group_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        self.create_component(
            &format!("/process-groups/{group_id}/input-ports"),
            NodeKind::InputPort,
            json!({
                "revision": RevisionDto::at(0),
                "component": { "name": name, "position": position },
            }),
        )
        .await
    }

    async fn create_output_port(
        &self,
        group_id: &str,
        name: &str,
        position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        self.create_component(
            &format!("/process-groups/{group_id}/output-ports"),
            NodeKind::OutputPort,
            json!({
                "revision": RevisionDto::at(0),
                "component": { "name": name, "position": position },
            }),
        )
        .await
    }

    async fn create_controller_service(
        &self,
        group_id: &str,
        service_type: &str,
        name: &str,
    ) -> Result<CanvasNode, CanvasError> {
        self.create_component(
            &format!("/process-groups/{group_id}/controller-services"),
            NodeKind::ControllerService,
            json!({
                "revision": RevisionDto::at(0),
                "component": { "type": service_type, "name": name },
            }),
        )
        .await
    }

    async fn enable_controller_service(
        &self,
        service: &CanvasNode,
    ) -> Result<CanvasNode, CanvasError> {
        self.set_service_state(service, "ENABLED").await
    }

    async fn list_connections(
        &self,
        group_id: &str,
        descendants: bool,
    ) -> Result<Vec<Connection>, CanvasError> {
        let mut pending = vec![group_id.to_string()];
        let mut found = Vec::new();

        while let Some(current) = pending.pop() {
            let listing: ConnectionsEntity = self
                .get_json(&format!("/process-groups/{current}/connections"))
                .await?;
            for entity in listing.connections {
                found.push(entity.into_connection(&current)?);
            }

            if descendants {
                pending.extend(self.child_groups(&current).await?.into_iter().map(|g| g.id));
            }
        }

        Ok(found)
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<Connection, CanvasError> {
        let body = ConnectionEntity {
            id: None,
            revision: RevisionDto::at(0),
            source_type: Some(spec.source.kind),
            destination_type: Some(spec.destination.kind),
            component: ConnectionDto {
                id: None,
                parent_group_id: None,
                name: spec.name.clone(),
                source: ConnectableDto::from(&spec.source),
                destination: ConnectableDto::from(&spec.destination),
                selected_relationships: spec.relationships.clone(),
            },
        };

        let entity: ConnectionEntity = self
            .post_json(
                &format!("/process-groups/{}/connections", spec.parent_group_id),
                &body,
            )
            .await?;
        let connection = entity.into_connection(&spec.parent_group_id)?;
        tracing::debug!(
            id = %connection.id,
            source = %connection.source.id,
            destination = %connection.destination.id,
            "Created connection"
        );
        Ok(connection)
    }

    async fn delete_connection(
        &self,
        connection: &Connection,
        purge: bool,
    ) -> Result<(), CanvasError> {
        if purge {
            self.drop_queue(&connection.id).await?;
        }
        let path = format!("/connections/{}", connection.id);
        let current: ConnectionEntity = self.get_json(&path).await?;
        self.delete_at(&path, current.revision.version).await?;
        tracing::debug!(id = %connection.id, "Deleted connection");
        Ok(())
    }

    async fn schedule_process_group(
        &self,
        group_id: &str,
        running: bool,
    ) -> Result<(), CanvasError> {
        let state = if running { "RUNNING" } else { "STOPPED" };
        let body = json!({ "id": group_id, "state": state });
        let response = self
            .client
            .put(self.url(&format!("/flow/process-groups/{group_id}")))
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        tracing::debug!(group_id, state, "Scheduled process group");
        Ok(())
    }
}
