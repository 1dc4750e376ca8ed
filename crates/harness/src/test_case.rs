//! One test case: declared inputs and outputs of a flow plus the runs
//! that exercise them.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use nifitest_core::message::Message;
//! # use nifitest_harness::{CanvasNavigator, TestCase};
//! # use nifitest_nifi::{NifiApi, NifiConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NifiConfig::from_env()?;
//! let api = Arc::new(NifiApi::new(&config)?);
//!
//! let mut nav = CanvasNavigator::new(api.as_ref()).await?;
//! nav.change_path("/ingest").await?;
//! let input = nav.processor("Parse").await?;
//! let output = nav.processor("Enrich").await?;
//! let base = nav.current().clone();
//!
//! let mut test = TestCase::from_config(api.clone(), &config, "parse then enrich", base)?;
//! test.declare_input(input).await?;
//! test.declare_output(output).await?;
//!
//! let result = test
//!     .run("Parse", &Message::new("hello", [("k", "v")]), &[], Duration::from_secs(5))
//!     .await?;
//! assert_eq!(result.output_name(), Some("Enrich"));
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nifitest_core::canvas::{CanvasNode, Connection, NodeKind};
use nifitest_core::message::Message;
use nifitest_nifi::{Canvas, NifiConfig};
use reqwest::header::HeaderName;
use serde::Deserialize;
use url::Url;

use crate::error::HarnessError;
use crate::navigator::CanvasNavigator;
use crate::probe::{self, Probe};
use crate::scaffold::{self, OutputMode, ScaffoldPlan};
use crate::session::{RewireSession, RunPhase, Teardown};

/// What to do with connections already attached to a declared node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Detach them for the duration of each run so test traffic does not
    /// leak into (or in from) the rest of the flow.
    #[default]
    Detach,
    /// Leave them in place.
    Keep,
}

/// A test case against one process group.
pub struct TestCase {
    canvas: Arc<dyn Canvas>,
    name: String,
    base: CanvasNode,
    port: u16,
    endpoint: Url,
    probe: Probe,
    mode: OutputMode,
    inputs: Vec<CanvasNode>,
    outputs: Vec<CanvasNode>,
    staged: Vec<Connection>,
    last_phases: Vec<RunPhase>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("base", &self.base.id)
            .field("endpoint", &self.endpoint.as_str())
            .field("mode", &self.mode)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

/// One element of a merged response body.
#[derive(Debug, Deserialize)]
struct MergedEntry {
    flowfile: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl TestCase {
    /// Prepare a test case that builds its scaffold inside `base` and
    /// listens on `port` of the NiFi host behind `api_url`.
    ///
    /// Spaces in `name` become underscores; the result names both the
    /// scaffold group and the ingress path.
    pub fn new(
        canvas: Arc<dyn Canvas>,
        api_url: &Url,
        name: &str,
        base: CanvasNode,
        port: u16,
    ) -> Result<Self, HarnessError> {
        if base.kind != NodeKind::ProcessGroup {
            return Err(HarnessError::InvalidArgument(format!(
                "test base {} is a {}, not a process group",
                base.name, base.kind
            )));
        }
        let name = name.trim().replace(' ', "_");
        if name.is_empty() {
            return Err(HarnessError::InvalidArgument(
                "test case name must not be empty".into(),
            ));
        }
        let endpoint = probe::scaffold_url(api_url, port, &name)?;

        Ok(Self {
            canvas,
            name,
            base,
            port,
            endpoint,
            probe: Probe::new(),
            mode: OutputMode::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            staged: Vec::new(),
            last_phases: Vec::new(),
        })
    }

    /// Like [`TestCase::new`], with the API URL and port from `config`.
    pub fn from_config(
        canvas: Arc<dyn Canvas>,
        config: &NifiConfig,
        name: &str,
        base: CanvasNode,
    ) -> Result<Self, HarnessError> {
        Self::new(canvas, &config.api_url, name, base, config.test_port)
    }

    /// Return the first output's flowfile ([`OutputMode::Single`], used by
    /// [`TestCase::run`]) or every output merged ([`OutputMode::Merged`],
    /// used by [`TestCase::run_all`]).
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Send test messages through `probe` instead of a default client.
    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    /// Scaffold group name, with spaces replaced.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process group the scaffold is built in.
    pub fn base(&self) -> &CanvasNode {
        &self.base
    }

    /// Port the scaffold ingress listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL the test message is posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// How outputs are returned.
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Declared entry points, in declaration order.
    pub fn inputs(&self) -> &[CanvasNode] {
        &self.inputs
    }

    /// Declared capture points, in declaration order.
    pub fn outputs(&self) -> &[CanvasNode] {
        &self.outputs
    }

    /// Connections that each run detaches and restores.
    pub fn staged_connections(&self) -> &[Connection] {
        &self.staged
    }

    /// Phases the most recent run went through.
    pub fn last_phases(&self) -> &[RunPhase] {
        &self.last_phases
    }

    // ---- declaration ----

    /// Declare an entry point, detaching its incoming connections during
    /// runs.
    pub async fn declare_input(&mut self, node: CanvasNode) -> Result<(), HarnessError> {
        self.declare_input_with(node, ConnectionPolicy::Detach).await
    }

    /// Declare an entry point with an explicit policy for its incoming
    /// connections.
    ///
    /// `node` must be a processor or port directly inside the base group.
    pub async fn declare_input_with(
        &mut self,
        node: CanvasNode,
        policy: ConnectionPolicy,
    ) -> Result<(), HarnessError> {
        check_declarable(&node, &self.base)?;
        if policy == ConnectionPolicy::Detach {
            self.stage_connections(|c| c.feeds(&node.id)).await?;
        }
        tracing::debug!(test = %self.name, input = %node.name, ?policy, "Declared input");
        self.inputs.push(node);
        Ok(())
    }

    /// Declare a capture point, detaching its outgoing connections during
    /// runs.
    pub async fn declare_output(&mut self, node: CanvasNode) -> Result<(), HarnessError> {
        self.declare_output_with(node, ConnectionPolicy::Detach).await
    }

    /// Declare a capture point with an explicit policy for its outgoing
    /// connections.
    ///
    /// `node` must be a processor or port directly inside the base group.
    pub async fn declare_output_with(
        &mut self,
        node: CanvasNode,
        policy: ConnectionPolicy,
    ) -> Result<(), HarnessError> {
        check_declarable(&node, &self.base)?;
        if policy == ConnectionPolicy::Detach {
            self.stage_connections(|c| c.drains(&node.id)).await?;
        }
        tracing::debug!(test = %self.name, output = %node.name, ?policy, "Declared output");
        self.outputs.push(node);
        Ok(())
    }

    /// Stage the live connections matching `touches`, skipping those of a
    /// leftover scaffold: every run demolishes it before detaching.
    async fn stage_connections<F>(&mut self, touches: F) -> Result<(), HarnessError>
    where
        F: Fn(&Connection) -> bool,
    {
        let scaffolds: BTreeSet<String> = CanvasNavigator::at(self.canvas.as_ref(), &self.base.id)
            .await?
            .groups(&self.name)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        let in_scaffold = |c: &Connection| {
            scaffolds.contains(&c.source.group_id) || scaffolds.contains(&c.destination.group_id)
        };

        let root_id = self.canvas.root_group_id().await?;
        let live = self.canvas.list_connections(&root_id, true).await?;
        let before = self.staged.len();
        for connection in live.into_iter().filter(|c| touches(c) && !in_scaffold(c)) {
            if !self.staged.iter().any(|s| s.id == connection.id) {
                self.staged.push(connection);
            }
        }
        tracing::debug!(
            test = %self.name,
            staged = self.staged.len() - before,
            "Staged connections for removal"
        );
        Ok(())
    }

    // ---- runs ----

    /// Post `message` to the input `input_name` and return the first
    /// flowfile that reaches a declared output.
    ///
    /// `captured` names extra attributes the egress echoes back as
    /// headers. The canvas is restored before this returns, whatever the
    /// outcome.
    pub async fn run(
        &mut self,
        input_name: &str,
        message: &Message,
        captured: &[&str],
        timeout: Duration,
    ) -> Result<Message, HarnessError> {
        if self.mode != OutputMode::Single {
            return Err(HarnessError::InvalidArgument(
                "run needs OutputMode::Single; use run_all for merged outputs".into(),
            ));
        }
        self.execute(input_name, message, captured, timeout).await
    }

    /// Post `message` to the input `input_name` and return one message per
    /// declared output, merged into a single response by the scaffold.
    pub async fn run_all(
        &mut self,
        input_name: &str,
        message: &Message,
        captured: &[&str],
        timeout: Duration,
    ) -> Result<Vec<Message>, HarnessError> {
        if self.mode != OutputMode::Merged {
            return Err(HarnessError::InvalidArgument(
                "run_all needs OutputMode::Merged".into(),
            ));
        }
        let response = self.execute(input_name, message, captured, timeout).await?;
        parse_merged(response.content())
    }

    async fn execute(
        &mut self,
        input_name: &str,
        message: &Message,
        captured: &[&str],
        timeout: Duration,
    ) -> Result<Message, HarnessError> {
        self.validate(input_name, message, captured, timeout)?;

        tracing::info!(
            test = %self.name,
            base = %self.base.name,
            input = input_name,
            staged = self.staged.len(),
            "Starting test run"
        );

        let canvas = Arc::clone(&self.canvas);
        let mut session = RewireSession::acquire(canvas.as_ref(), &self.base.id, &self.name).await?;
        let outcome = self
            .exercise(&mut session, input_name, message, captured, timeout)
            .await;
        let teardown = session.release().await;

        self.restage(&teardown);
        self.last_phases = teardown.phases.clone();

        match outcome {
            Ok(response) => match teardown.errors.into_iter().next() {
                Some(err) => Err(err),
                None => {
                    tracing::info!(test = %self.name, "Test run finished");
                    Ok(response)
                }
            },
            Err(err) => {
                tracing::warn!(
                    test = %self.name,
                    error = %err,
                    teardown_errors = teardown.errors.len(),
                    "Test run failed"
                );
                Err(err)
            }
        }
    }

    async fn exercise(
        &self,
        session: &mut RewireSession<'_>,
        input_name: &str,
        message: &Message,
        captured: &[&str],
        timeout: Duration,
    ) -> Result<Message, HarnessError> {
        let canvas = self.canvas.as_ref();

        let stale = scaffold::demolish(canvas, &self.base.id, &self.name).await?;
        if stale > 0 {
            tracing::warn!(test = %self.name, count = stale, "Removed leftover scaffold");
        }
        let plan = ScaffoldPlan {
            name: &self.name,
            path: self.endpoint.path(),
            port: self.port,
            inputs: &self.inputs,
            outputs: &self.outputs,
            mode: self.mode,
        };
        let built = scaffold::build(canvas, &self.base, plan).await?;
        session.enter(RunPhase::Scaffolded);

        for connection in &self.staged {
            session.detach(connection).await?;
        }
        session.enter(RunPhase::Rewired);

        if !captured.is_empty() {
            let properties: BTreeMap<String, String> = captured
                .iter()
                .map(|name| (name.to_string(), format!("${{{name}}}")))
                .collect();
            canvas
                .update_processor_properties(&built.egress, &properties)
                .await?;
        }

        canvas.schedule_process_group(&self.base.id, true).await?;
        session.enter(RunPhase::Running);

        let result = self
            .probe
            .send(&self.endpoint, message, input_name, timeout)
            .await;
        session.enter(RunPhase::after_probe(&result));
        result
    }

    /// Point the staged list at the live connections after a teardown.
    fn restage(&mut self, teardown: &Teardown) {
        let replacements: HashMap<&str, &Connection> = teardown
            .restored
            .iter()
            .map(|(old_id, c)| (old_id.as_str(), c))
            .collect();
        for connection in &mut self.staged {
            if let Some(recreated) = replacements.get(connection.id.as_str()) {
                *connection = (*recreated).clone();
            }
        }
        if !teardown.unrestored.is_empty() {
            tracing::error!(
                test = %self.name,
                count = teardown.unrestored.len(),
                "Connections could not be restored"
            );
        }
    }

    fn validate(
        &self,
        input_name: &str,
        message: &Message,
        captured: &[&str],
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        if self.inputs.is_empty() {
            return Err(HarnessError::InvalidArgument("no input declared".into()));
        }
        if self.outputs.is_empty() {
            return Err(HarnessError::InvalidArgument("no output declared".into()));
        }

        let mut names = BTreeSet::new();
        for input in &self.inputs {
            if !names.insert(input.name.as_str()) {
                return Err(HarnessError::InvalidArgument(format!(
                    "input name {:?} is declared more than once",
                    input.name
                )));
            }
        }
        if !names.contains(input_name) {
            return Err(HarnessError::InvalidArgument(format!(
                "{input_name:?} is not a declared input"
            )));
        }

        probe::prepare_headers(message, input_name)?;
        for name in captured {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(HarnessError::InvalidArgument(format!(
                    "captured attribute {name:?} is not a valid header name"
                )));
            }
        }

        if timeout.is_zero() {
            return Err(HarnessError::InvalidArgument(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn check_declarable(node: &CanvasNode, base: &CanvasNode) -> Result<(), HarnessError> {
    match node.kind {
        NodeKind::Processor | NodeKind::InputPort | NodeKind::OutputPort => {}
        other => {
            return Err(HarnessError::InvalidArgument(format!(
                "{} is a {other}; only processors and ports can be declared",
                node.name
            )));
        }
    }
    if node.parent_group_id.as_deref() != Some(base.id.as_str()) {
        return Err(HarnessError::InvalidArgument(format!(
            "{} {} is not directly inside test base {}",
            node.kind, node.name, base.name
        )));
    }
    Ok(())
}

/// Split a merged response body into one message per output.
fn parse_merged(body: &str) -> Result<Vec<Message>, HarnessError> {
    let entries: Vec<MergedEntry> = serde_json::from_str(body)
        .map_err(|e| HarnessError::MalformedResponse(format!("{e}: {body}")))?;
    Ok(entries
        .into_iter()
        .map(|entry| Message::new(entry.flowfile, entry.attributes))
        .collect())
}
