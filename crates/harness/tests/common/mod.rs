//! Shared fixtures for harness integration tests: an in-memory canvas and
//! a few canned flows.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nifitest_core::canvas::{
    processor_types, relationships, CanvasNode, Connection, ConnectionSpec, NodeKind,
    ProcessorSpec,
};
use nifitest_core::location::Location;
use nifitest_core::types::NodeId;
use nifitest_nifi::{Canvas, CanvasError};

pub const ROOT_ID: &str = "root";

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Source, destination and labels of a connection.
pub type Wire = (NodeId, NodeId, BTreeSet<String>);

#[derive(Default)]
struct State {
    seq: u64,
    groups: BTreeMap<NodeId, CanvasNode>,
    nodes: BTreeMap<NodeId, CanvasNode>,
    properties: BTreeMap<NodeId, BTreeMap<String, String>>,
    connections: BTreeMap<NodeId, Connection>,
    running: BTreeMap<NodeId, bool>,
    enabled: BTreeSet<NodeId>,
    /// Operation name -> calls left before it fails once.
    failures: BTreeMap<String, usize>,
    calls: Vec<String>,
    created_processors: Vec<ProcessorSpec>,
    property_updates: Vec<(String, BTreeMap<String, String>)>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> NodeId {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn record(&mut self, op: &str) -> Result<(), CanvasError> {
        self.calls.push(op.to_string());
        if let Some(left) = self.failures.get_mut(op) {
            *left -= 1;
            if *left == 0 {
                self.failures.remove(op);
                return Err(CanvasError::Api {
                    status: 500,
                    body: format!("injected failure in {op}"),
                });
            }
        }
        Ok(())
    }

    fn group(&self, id: &str) -> Result<&CanvasNode, CanvasError> {
        self.groups.get(id).ok_or_else(|| CanvasError::NotFound {
            kind: NodeKind::ProcessGroup,
            id: id.to_string(),
        })
    }

    fn children(&self, group_id: &str, kind: NodeKind) -> Result<Vec<CanvasNode>, CanvasError> {
        self.group(group_id)?;
        let source = if kind == NodeKind::ProcessGroup {
            &self.groups
        } else {
            &self.nodes
        };
        Ok(source
            .values()
            .filter(|n| n.kind == kind && n.parent_group_id.as_deref() == Some(group_id))
            .cloned()
            .collect())
    }

    /// `group_id` and every group below it.
    fn subtree(&self, group_id: &str) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::from([group_id.to_string()]);
        loop {
            let before = found.len();
            for group in self.groups.values() {
                if let Some(parent) = &group.parent_group_id {
                    if found.contains(parent) {
                        found.insert(group.id.clone());
                    }
                }
            }
            if found.len() == before {
                return found;
            }
        }
    }

    fn add_node(&mut self, group_id: &str, name: &str, kind: NodeKind, rels: Vec<String>) -> CanvasNode {
        let prefix = match kind {
            NodeKind::ProcessGroup => "pg",
            NodeKind::Processor => "proc",
            NodeKind::InputPort => "in",
            NodeKind::OutputPort => "out",
            NodeKind::ControllerService => "cs",
        };
        let id = self.next_id(prefix);
        let node = CanvasNode::new(id.clone(), name, kind)
            .with_parent(group_id)
            .with_version(1)
            .with_relationships(rels);
        if kind == NodeKind::ProcessGroup {
            self.groups.insert(id, node.clone());
        } else {
            self.nodes.insert(id, node.clone());
        }
        node
    }

    fn connect(&mut self, spec: &ConnectionSpec) -> Result<Connection, CanvasError> {
        self.group(&spec.parent_group_id)?;
        let source = self.nodes.get(&spec.source.id).ok_or_else(|| CanvasError::Api {
            status: 404,
            body: format!("unknown source {}", spec.source.id),
        })?;
        if !self.nodes.contains_key(&spec.destination.id) {
            return Err(CanvasError::Api {
                status: 404,
                body: format!("unknown destination {}", spec.destination.id),
            });
        }
        if source.kind == NodeKind::Processor {
            if spec.relationships.is_empty() {
                return Err(CanvasError::Api {
                    status: 400,
                    body: format!("no relationship selected from {}", source.name),
                });
            }
            if let Some(bad) = spec
                .relationships
                .iter()
                .find(|r| !source.relationships.contains(*r))
            {
                return Err(CanvasError::Api {
                    status: 400,
                    body: format!("{} has no relationship {bad}", source.name),
                });
            }
        }
        let id = self.next_id("conn");
        let connection = Connection::from_spec(id.clone(), 1, spec.clone());
        self.connections.insert(id, connection.clone());
        Ok(connection)
    }
}

/// A NiFi canvas kept entirely in memory.
///
/// Enforces the rules that matter for rewiring (connections need live
/// endpoints, processor sources need existing relationships) and can be
/// told to fail a specific operation.
pub struct InMemoryCanvas {
    state: Mutex<State>,
}

impl InMemoryCanvas {
    pub fn new() -> Self {
        let mut state = State::default();
        state.groups.insert(
            ROOT_ID.to_string(),
            CanvasNode::new(ROOT_ID, "NiFi Flow", NodeKind::ProcessGroup),
        );
        Self {
            state: Mutex::new(state),
        }
    }

    // ---- setup ----

    pub fn add_group(&self, parent_id: &str, name: &str) -> CanvasNode {
        self.state
            .lock()
            .unwrap()
            .add_node(parent_id, name, NodeKind::ProcessGroup, Vec::new())
    }

    pub fn add_processor(&self, group_id: &str, name: &str) -> CanvasNode {
        self.state.lock().unwrap().add_node(
            group_id,
            name,
            NodeKind::Processor,
            vec![relationships::SUCCESS.into(), relationships::FAILURE.into()],
        )
    }

    pub fn add_port(&self, group_id: &str, name: &str, kind: NodeKind) -> CanvasNode {
        self.state
            .lock()
            .unwrap()
            .add_node(group_id, name, kind, Vec::new())
    }

    pub fn add_service(&self, group_id: &str, name: &str) -> CanvasNode {
        self.state
            .lock()
            .unwrap()
            .add_node(group_id, name, NodeKind::ControllerService, Vec::new())
    }

    pub fn link(&self, source: &CanvasNode, destination: &CanvasNode, rels: &[&str]) -> Connection {
        let spec = ConnectionSpec::between(source, destination, Some(rels)).unwrap();
        self.state.lock().unwrap().connect(&spec).unwrap()
    }

    // ---- fault injection ----

    /// Make the next call to `op` fail.
    pub fn fail_once(&self, op: &str) {
        self.fail_nth(op, 1);
    }

    /// Make the `n`-th call to `op` from now fail.
    pub fn fail_nth(&self, op: &str, n: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), n);
    }

    // ---- inspection ----

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change the canvas.
    pub fn mutations(&self) -> usize {
        const MUTATING: [&str; 5] = ["create_", "delete_", "update_", "enable_", "schedule_"];
        self.calls()
            .iter()
            .filter(|c| MUTATING.iter().any(|m| c.starts_with(m)))
            .count()
    }

    pub fn connection_ids(&self) -> BTreeSet<NodeId> {
        self.state.lock().unwrap().connections.keys().cloned().collect()
    }

    /// Identity-free view of every connection owned by `group_id`.
    pub fn wiring(&self, group_id: &str) -> BTreeSet<Wire> {
        self.state
            .lock()
            .unwrap()
            .connections
            .values()
            .filter(|c| c.parent_group_id == group_id)
            .map(|c| (c.source.id.clone(), c.destination.id.clone(), c.relationships.clone()))
            .collect()
    }

    pub fn connection_count(&self, group_id: &str) -> usize {
        self.wiring(group_id).len()
    }

    pub fn groups_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.name == name)
            .count()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn is_running(&self, group_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .running
            .get(group_id)
            .copied()
            .unwrap_or(false)
    }

    /// Every processor created through the trait, in order.
    pub fn created_processors(&self) -> Vec<ProcessorSpec> {
        self.state.lock().unwrap().created_processors.clone()
    }

    pub fn created_processor(&self, name: &str) -> Option<ProcessorSpec> {
        self.created_processors()
            .into_iter()
            .rev()
            .find(|p| p.name == name)
    }

    /// `(processor name, properties)` for every property update.
    pub fn property_updates(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().property_updates.clone()
    }
}

fn relationships_for(spec: &ProcessorSpec) -> Vec<String> {
    let names = |rels: &[&str]| rels.iter().map(|r| r.to_string()).collect::<Vec<_>>();
    match spec.processor_type.as_str() {
        processor_types::ROUTE_ON_ATTRIBUTE => {
            let mut rels: Vec<String> = spec.properties.keys().cloned().collect();
            rels.push(relationships::UNMATCHED.into());
            rels
        }
        processor_types::HANDLE_HTTP_RESPONSE | processor_types::REPLACE_TEXT => {
            names(&[relationships::SUCCESS, relationships::FAILURE])
        }
        processor_types::MERGE_CONTENT => names(&[
            relationships::MERGED,
            relationships::ORIGINAL,
            relationships::FAILURE,
        ]),
        _ => names(&[relationships::SUCCESS]),
    }
}

#[async_trait]
impl Canvas for InMemoryCanvas {
    async fn root_group_id(&self) -> Result<NodeId, CanvasError> {
        self.state.lock().unwrap().record("root_group_id")?;
        Ok(ROOT_ID.to_string())
    }

    async fn process_group(&self, id: &str) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("process_group")?;
        state.group(id).cloned()
    }

    async fn child_groups(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("child_groups")?;
        state.children(group_id, NodeKind::ProcessGroup)
    }

    async fn processors(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("processors")?;
        state.children(group_id, NodeKind::Processor)
    }

    async fn input_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("input_ports")?;
        state.children(group_id, NodeKind::InputPort)
    }

    async fn output_ports(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("output_ports")?;
        state.children(group_id, NodeKind::OutputPort)
    }

    async fn controller_services(&self, group_id: &str) -> Result<Vec<CanvasNode>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("controller_services")?;
        state.children(group_id, NodeKind::ControllerService)
    }

    async fn create_process_group(
        &self,
        parent_id: &str,
        name: &str,
        _position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_process_group")?;
        state.group(parent_id)?;
        Ok(state.add_node(parent_id, name, NodeKind::ProcessGroup, Vec::new()))
    }

    async fn delete_process_group(
        &self,
        group: &CanvasNode,
        force: bool,
    ) -> Result<(), CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("delete_process_group")?;
        state.group(&group.id)?;

        let doomed = state.subtree(&group.id);
        let has_contents = state
            .nodes
            .values()
            .any(|n| n.parent_group_id.as_ref().is_some_and(|p| doomed.contains(p)));
        if has_contents && !force {
            return Err(CanvasError::Api {
                status: 409,
                body: format!("{} is not empty", group.name),
            });
        }

        let removed_nodes: BTreeSet<NodeId> = state
            .nodes
            .values()
            .filter(|n| n.parent_group_id.as_ref().is_some_and(|p| doomed.contains(p)))
            .map(|n| n.id.clone())
            .collect();
        state.nodes.retain(|id, _| !removed_nodes.contains(id));
        state.connections.retain(|_, c| {
            !doomed.contains(&c.parent_group_id)
                && !removed_nodes.contains(&c.source.id)
                && !removed_nodes.contains(&c.destination.id)
        });
        state.groups.retain(|id, _| !doomed.contains(id));
        state.enabled.retain(|id| !removed_nodes.contains(id));
        Ok(())
    }

    async fn create_processor(
        &self,
        group_id: &str,
        spec: &ProcessorSpec,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_processor")?;
        state.group(group_id)?;
        let node = state.add_node(group_id, &spec.name, NodeKind::Processor, relationships_for(spec));
        state.properties.insert(node.id.clone(), spec.properties.clone());
        state.created_processors.push(spec.clone());
        Ok(node)
    }

    async fn update_processor_properties(
        &self,
        processor: &CanvasNode,
        properties: &BTreeMap<String, String>,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("update_processor_properties")?;
        let node = state
            .nodes
            .get_mut(&processor.id)
            .ok_or_else(|| CanvasError::NotFound {
                kind: NodeKind::Processor,
                id: processor.id.clone(),
            })?;
        node.version += 1;
        let node = node.clone();
        state
            .properties
            .entry(node.id.clone())
            .or_default()
            .extend(properties.clone());
        state
            .property_updates
            .push((node.name.clone(), properties.clone()));
        Ok(node)
    }

    async fn create_input_port(
        &self,
        group_id: &str,
        name: &str,
        _position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_input_port")?;
        state.group(group_id)?;
        Ok(state.add_node(group_id, name, NodeKind::InputPort, Vec::new()))
    }

    async fn create_output_port(
        &self,
        group_id: &str,
        name: &str,
        _position: Location,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_output_port")?;
        state.group(group_id)?;
        Ok(state.add_node(group_id, name, NodeKind::OutputPort, Vec::new()))
    }

    async fn create_controller_service(
        &self,
        group_id: &str,
        _service_type: &str,
        name: &str,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_controller_service")?;
        state.group(group_id)?;
        Ok(state.add_node(group_id, name, NodeKind::ControllerService, Vec::new()))
    }

    async fn enable_controller_service(
        &self,
        service: &CanvasNode,
    ) -> Result<CanvasNode, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("enable_controller_service")?;
        let node = state
            .nodes
            .get_mut(&service.id)
            .ok_or_else(|| CanvasError::NotFound {
                kind: NodeKind::ControllerService,
                id: service.id.clone(),
            })?;
        node.version += 1;
        let node = node.clone();
        state.enabled.insert(node.id.clone());
        Ok(node)
    }

    async fn list_connections(
        &self,
        group_id: &str,
        descendants: bool,
    ) -> Result<Vec<Connection>, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("list_connections")?;
        state.group(group_id)?;
        let scope = if descendants {
            state.subtree(group_id)
        } else {
            BTreeSet::from([group_id.to_string()])
        };
        Ok(state
            .connections
            .values()
            .filter(|c| scope.contains(&c.parent_group_id))
            .cloned()
            .collect())
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<Connection, CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_connection")?;
        state.connect(spec)
    }

    async fn delete_connection(
        &self,
        connection: &Connection,
        _purge: bool,
    ) -> Result<(), CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("delete_connection")?;
        match state.connections.remove(&connection.id) {
            Some(_) => Ok(()),
            None => Err(CanvasError::Api {
                status: 404,
                body: format!("connection {} not found", connection.id),
            }),
        }
    }

    async fn schedule_process_group(
        &self,
        group_id: &str,
        running: bool,
    ) -> Result<(), CanvasError> {
        let mut state = self.state.lock().unwrap();
        state.record("schedule_process_group")?;
        state.group(group_id)?;
        state.running.insert(group_id.to_string(), running);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Canned flows
// ---------------------------------------------------------------------------

/// `Start -> Processor 2 -> Processor 3 -> End` inside a group below root,
/// plus optional extra sinks after Processor 3.
pub struct Flow {
    pub canvas: Arc<InMemoryCanvas>,
    pub base: CanvasNode,
    pub start: CanvasNode,
    pub p2: CanvasNode,
    pub p3: CanvasNode,
    pub ends: Vec<CanvasNode>,
}

impl Flow {
    pub fn linear() -> Self {
        Self::with_ends(&["End"])
    }

    pub fn fan_out() -> Self {
        Self::with_ends(&["End 1", "End 2"])
    }

    fn with_ends(ends: &[&str]) -> Self {
        let canvas = Arc::new(InMemoryCanvas::new());
        let base = canvas.add_group(ROOT_ID, "Test1To1");
        let start = canvas.add_processor(&base.id, "Start");
        let p2 = canvas.add_processor(&base.id, "P2");
        let p3 = canvas.add_processor(&base.id, "P3");
        canvas.link(&start, &p2, &["success"]);
        canvas.link(&p2, &p3, &["success", "failure"]);
        let ends = ends
            .iter()
            .map(|name| {
                let end = canvas.add_processor(&base.id, name);
                canvas.link(&p3, &end, &["success", "failure"]);
                end
            })
            .collect();
        Self {
            canvas,
            base,
            start,
            p2,
            p3,
            ends,
        }
    }

    pub fn wiring(&self) -> BTreeSet<Wire> {
        self.canvas.wiring(&self.base.id)
    }

    pub fn shared(&self) -> Arc<dyn Canvas> {
        self.canvas.clone()
    }
}
