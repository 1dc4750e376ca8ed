//! The disposable process group that wires a flow up for one test run.
//!
//! Layout of a built scaffold (top to bottom):
//!
//! ```text
//! Receive test message        HandleHttpRequest on the test port
//! Set test start time         UpdateAttribute
//! Route to correct input      RouteOnAttribute, one route per input
//! <input> ports ...           output ports feeding the flow under test
//! <output> ports ...          input ports fed by the flow under test
//! Set output name '<output>'  UpdateAttribute per output
//! Set test duration           UpdateAttribute shared by every output
//! Filter only test messages   RouteOnAttribute on the request URI
//! [Merge flowfile and attributes, Merge outputs]   merged mode only
//! Return test result          HandleHttpResponse
//! ```
//!
//! Every builder here is a thin [`ProcessorSpec`] factory so the shape of
//! the scaffold can be checked without a canvas.

use nifitest_core::canvas::{
    controller_types, processor_types, relationships, CanvasNode, Connection, ConnectionSpec,
    ProcessorSpec,
};
use nifitest_core::location::{Location, PORT_OFFSET_X, ROW_HEIGHT};
use nifitest_core::message::attributes;
use nifitest_nifi::Canvas;

use crate::error::HarnessError;
use crate::navigator::CanvasNavigator;

pub const REQUEST_HANDLER: &str = "Receive test message";
pub const START_TIME_SETTER: &str = "Set test start time";
pub const DURATION_SETTER: &str = "Set test duration";
pub const INPUT_ROUTER: &str = "Route to correct input";
pub const OUTPUT_ROUTER: &str = "Filter only test messages";
pub const RESPONSE_HANDLER: &str = "Return test result";
pub const CONTENT_WRAPPER: &str = "Merge flowfile and attributes";
pub const OUTPUT_MERGER: &str = "Merge outputs";

/// Route the egress router sends test responses on.
pub const TEST_ROUTE: &str = "test";

const HTTP_CONTEXT_MAP: &str = "HTTP Context Map";
const LISTENING_PORT: &str = "Listening Port";
const HTTP_STATUS_CODE: &str = "HTTP Status Code";

/// y coordinate of the first row of output ports.
const OUTPUTS_Y: f64 = 800.0;
/// y coordinate of the duration setter.
const DURATION_Y: f64 = 1200.0;
/// y coordinate of the egress router.
const EGRESS_Y: f64 = 1400.0;

/// How captured outputs are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// The first flowfile reaching any output is the response.
    #[default]
    Single,
    /// Flowfiles from every output are wrapped as JSON and merged into one
    /// response array.
    Merged,
}

/// What to build.
#[derive(Debug, Clone, Copy)]
pub struct ScaffoldPlan<'a> {
    pub name: &'a str,
    /// Request path the ingress is reached on, percent-encoded as sent.
    pub path: &'a str,
    pub port: u16,
    pub inputs: &'a [CanvasNode],
    pub outputs: &'a [CanvasNode],
    pub mode: OutputMode,
}

/// Handles to the parts of a built scaffold the orchestrator touches
/// afterwards.
#[derive(Debug, Clone)]
pub struct Scaffold {
    pub group: CanvasNode,
    pub http_context: CanvasNode,
    pub ingress: CanvasNode,
    pub egress: CanvasNode,
    /// Scaffold output ports, one per declared input.
    pub input_ports: Vec<CanvasNode>,
    /// Scaffold input ports, one per declared output.
    pub output_ports: Vec<CanvasNode>,
}

// ---------------------------------------------------------------------------
// Build / demolish
// ---------------------------------------------------------------------------

/// Create the scaffold group inside `base` and wire it to the declared
/// inputs and outputs.
///
/// Stops at the first failing canvas call. Whatever was created so far is
/// left in place for [`demolish`] to remove.
pub async fn build(
    canvas: &dyn Canvas,
    base: &CanvasNode,
    plan: ScaffoldPlan<'_>,
) -> Result<Scaffold, HarnessError> {
    tracing::info!(scaffold = plan.name, base = %base.name, mode = ?plan.mode, "Building scaffold");

    let group = canvas
        .create_process_group(&base.id, plan.name, Location::default())
        .await?;

    tracing::debug!(scaffold = plan.name, "Creating 'StandardHttpContextMap'");
    let context = canvas
        .create_controller_service(&group.id, controller_types::STANDARD_HTTP_CONTEXT_MAP, plan.name)
        .await?;
    let http_context = canvas.enable_controller_service(&context).await?;

    let (ingress, input_ports) = build_inputs(canvas, &group, &http_context, &plan).await?;
    let (egress, output_ports) = build_outputs(canvas, &group, &http_context, &plan).await?;

    Ok(Scaffold {
        group,
        http_context,
        ingress,
        egress,
        input_ports,
        output_ports,
    })
}

/// Delete every child group of `base_id` named `name`, forcing through
/// running components and queued flowfiles.
///
/// Returns how many groups were removed.
pub async fn demolish(canvas: &dyn Canvas, base_id: &str, name: &str) -> Result<usize, HarnessError> {
    let navigator = CanvasNavigator::at(canvas, base_id).await?;
    let groups = navigator.groups(name).await?;
    for group in &groups {
        tracing::debug!(scaffold = name, group_id = %group.id, "Deleting scaffold group");
        canvas.delete_process_group(group, true).await?;
    }
    Ok(groups.len())
}

async fn build_inputs(
    canvas: &dyn Canvas,
    group: &CanvasNode,
    http_context: &CanvasNode,
    plan: &ScaffoldPlan<'_>,
) -> Result<(CanvasNode, Vec<CanvasNode>), HarnessError> {
    let mut location = Location::default();

    tracing::debug!(scaffold = plan.name, "Creating 'HandleHttpRequest'");
    let ingress = canvas
        .create_processor(
            &group.id,
            &request_handler_spec(location, &http_context.id, plan.port),
        )
        .await?;
    location.next_row();

    tracing::debug!(scaffold = plan.name, "Creating 'UpdateAttribute' for start time");
    let start_time = canvas
        .create_processor(&group.id, &start_time_spec(location))
        .await?;
    location.next_row();
    connect(canvas, &ingress, &start_time, Some(&[relationships::SUCCESS])).await?;

    tracing::debug!(scaffold = plan.name, "Creating 'RouteOnAttribute' for inputs");
    let names: Vec<&str> = plan.inputs.iter().map(|i| i.name.as_str()).collect();
    let router = canvas
        .create_processor(&group.id, &input_router_spec(location, &names))
        .await?;
    location.next_row();
    connect(canvas, &start_time, &router, Some(&[relationships::SUCCESS])).await?;

    // extra room, there can be many ports
    location.advance_down(ROW_HEIGHT / 2.0);

    let mut ports = Vec::with_capacity(plan.inputs.len());
    for input in plan.inputs {
        tracing::debug!(scaffold = plan.name, input = %input.name, "Creating port for input");
        let port = canvas
            .create_output_port(&group.id, &input.name, location.offset_x(PORT_OFFSET_X))
            .await?;
        location.next_column();
        connect(canvas, &router, &port, Some(&[input.name.as_str()])).await?;
        connect(canvas, &port, input, None).await?;
        ports.push(port);
    }

    Ok((ingress, ports))
}

async fn build_outputs(
    canvas: &dyn Canvas,
    group: &CanvasNode,
    http_context: &CanvasNode,
    plan: &ScaffoldPlan<'_>,
) -> Result<(CanvasNode, Vec<CanvasNode>), HarnessError> {
    let mut location = Location::new(0.0, EGRESS_Y);

    tracing::debug!(scaffold = plan.name, "Creating 'RouteOnAttribute' for test results");
    let router = canvas
        .create_processor(&group.id, &output_router_spec(location, plan.path))
        .await?;
    location.next_row();

    let duration = canvas
        .create_processor(&group.id, &duration_spec(Location::new(0.0, DURATION_Y)))
        .await?;
    connect(canvas, &duration, &router, Some(&[relationships::SUCCESS])).await?;

    let egress_feed = match plan.mode {
        OutputMode::Single => router.clone(),
        OutputMode::Merged => {
            let wrapper = canvas
                .create_processor(&group.id, &content_wrapper_spec(location))
                .await?;
            location.next_row();
            connect(canvas, &router, &wrapper, Some(&[TEST_ROUTE])).await?;

            let merger = canvas
                .create_processor(&group.id, &output_merger_spec(location, plan.outputs.len()))
                .await?;
            location.next_row();
            connect(canvas, &wrapper, &merger, Some(&[relationships::SUCCESS])).await?;
            merger
        }
    };

    tracing::debug!(scaffold = plan.name, "Creating 'HandleHttpResponse'");
    let egress = canvas
        .create_processor(&group.id, &response_handler_spec(location, &http_context.id))
        .await?;
    let feed_route = match plan.mode {
        OutputMode::Single => TEST_ROUTE,
        OutputMode::Merged => relationships::MERGED,
    };
    connect(canvas, &egress_feed, &egress, Some(&[feed_route])).await?;

    let mut location = Location::new(0.0, OUTPUTS_Y);
    let mut ports = Vec::with_capacity(plan.outputs.len());
    for output in plan.outputs {
        location.y = OUTPUTS_Y;
        tracing::debug!(scaffold = plan.name, output = %output.name, "Creating port for output");
        let port = canvas
            .create_input_port(&group.id, &output.name, location.offset_x(PORT_OFFSET_X))
            .await?;
        location.next_row();
        connect(canvas, output, &port, None).await?;

        let setter = canvas
            .create_processor(&group.id, &output_attribute_spec(location, &output.name))
            .await?;
        connect(canvas, &port, &setter, None).await?;
        connect(canvas, &setter, &duration, None).await?;
        location.next_column();
        ports.push(port);
    }

    Ok((egress, ports))
}

async fn connect(
    canvas: &dyn Canvas,
    source: &CanvasNode,
    destination: &CanvasNode,
    relationships: Option<&[&str]>,
) -> Result<Connection, HarnessError> {
    let spec = ConnectionSpec::between(source, destination, relationships)?;
    Ok(canvas.create_connection(&spec).await?)
}

// ---------------------------------------------------------------------------
// Processor specs
// ---------------------------------------------------------------------------

pub fn request_handler_spec(location: Location, context_id: &str, port: u16) -> ProcessorSpec {
    ProcessorSpec::new(processor_types::HANDLE_HTTP_REQUEST, REQUEST_HANDLER, location)
        .property(HTTP_CONTEXT_MAP, context_id)
        .property(LISTENING_PORT, port.to_string())
}

pub fn start_time_spec(location: Location) -> ProcessorSpec {
    ProcessorSpec::new(processor_types::UPDATE_ATTRIBUTE, START_TIME_SETTER, location)
        .property(attributes::TEST_START_TIME, "${now():toNumber()}")
}

/// One route per input, matched on the `test_input_name` request header.
pub fn input_router_spec(location: Location, inputs: &[&str]) -> ProcessorSpec {
    inputs.iter().fold(
        ProcessorSpec::new(processor_types::ROUTE_ON_ATTRIBUTE, INPUT_ROUTER, location)
            .auto_terminate(relationships::UNMATCHED),
        |spec, name| {
            spec.property(
                *name,
                format!(
                    "${{http.headers.{}:equals({})}}",
                    attributes::TEST_INPUT_NAME,
                    el_literal(name)
                ),
            )
        },
    )
}

/// Passes only flowfiles that arrived through this scaffold's ingress.
///
/// `path` is compared as NiFi records it, undecoded.
pub fn output_router_spec(location: Location, path: &str) -> ProcessorSpec {
    ProcessorSpec::new(processor_types::ROUTE_ON_ATTRIBUTE, OUTPUT_ROUTER, location)
        .property(
            TEST_ROUTE,
            format!("${{http.request.uri:equals({})}}", el_literal(path)),
        )
        .auto_terminate(relationships::UNMATCHED)
}

pub fn response_handler_spec(location: Location, context_id: &str) -> ProcessorSpec {
    let spec = ProcessorSpec::new(processor_types::HANDLE_HTTP_RESPONSE, RESPONSE_HANDLER, location)
        .property(HTTP_CONTEXT_MAP, context_id)
        .property(HTTP_STATUS_CODE, "200")
        .auto_terminate(relationships::SUCCESS)
        .auto_terminate(relationships::FAILURE);
    attributes::ECHOED
        .iter()
        .fold(spec, |spec, name| spec.property(*name, echo_expression(name)))
}

pub fn output_attribute_spec(location: Location, output: &str) -> ProcessorSpec {
    ProcessorSpec::new(
        processor_types::UPDATE_ATTRIBUTE,
        format!("Set output name '{output}'"),
        location,
    )
    .property(attributes::TEST_OUTPUT_NAME, output)
    .property(attributes::TEST_END_TIME, "${now():toNumber()}")
}

/// Runs after the end time is set. UpdateAttribute evaluates each
/// property against the incoming flowfile, so the duration needs its own
/// processor to see `test_end_time`.
pub fn duration_spec(location: Location) -> ProcessorSpec {
    ProcessorSpec::new(processor_types::UPDATE_ATTRIBUTE, DURATION_SETTER, location).property(
        attributes::TEST_DURATION,
        format!(
            "${{{}:minus(${{{}}})}}",
            attributes::TEST_END_TIME,
            attributes::TEST_START_TIME
        ),
    )
}

/// Rewrites a flowfile as `{"flowfile": ..., "attributes": {...}}` so the
/// echoed attributes survive merging.
pub fn content_wrapper_spec(location: Location) -> ProcessorSpec {
    let fields: Vec<String> = attributes::ECHOED
        .iter()
        .map(|name| format!("\"{name}\":\"{}\"", echo_expression(name)))
        .collect();
    let replacement = format!(
        "{{\"flowfile\":\"$1\",\"attributes\":{{{}}}}}",
        fields.join(",")
    );
    ProcessorSpec::new(processor_types::REPLACE_TEXT, CONTENT_WRAPPER, location)
        .property("Replacement Value", replacement)
        .auto_terminate(relationships::FAILURE)
}

/// Merges wrapped flowfiles into a JSON array once every output reported.
pub fn output_merger_spec(location: Location, outputs: usize) -> ProcessorSpec {
    ProcessorSpec::new(processor_types::MERGE_CONTENT, OUTPUT_MERGER, location)
        .property("Delimiter Strategy", "Text")
        .property("Header", "[")
        .property("Footer", "]")
        .property("Demarcator", ",")
        .property("Minimum Number of Entries", outputs.max(1).to_string())
        .auto_terminate(relationships::FAILURE)
        .auto_terminate(relationships::ORIGINAL)
}

/// Single-quoted Expression Language string literal.
fn el_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Expression reading an echoed attribute. The input name is still a
/// request header at that point.
fn echo_expression(name: &str) -> String {
    if name == attributes::TEST_INPUT_NAME {
        format!("${{http.headers.{name}}}")
    } else {
        format!("${{{name}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_router_routes_each_input_by_header() {
        let spec = input_router_spec(Location::default(), &["P2", "Other"]);
        assert_eq!(spec.name, INPUT_ROUTER);
        assert_eq!(
            spec.properties["P2"],
            "${http.headers.test_input_name:equals('P2')}"
        );
        assert_eq!(
            spec.properties["Other"],
            "${http.headers.test_input_name:equals('Other')}"
        );
        assert!(spec.auto_terminated_relationships.contains("unmatched"));
    }

    #[test]
    fn quotes_in_input_names_are_escaped() {
        let spec = input_router_spec(Location::default(), &["Don't parse"]);
        assert_eq!(
            spec.properties["Don't parse"],
            r"${http.headers.test_input_name:equals('Don\'t parse')}"
        );
    }

    #[test]
    fn output_router_filters_on_scaffold_path() {
        let spec = output_router_spec(Location::default(), "/Test_1_to_1");
        assert_eq!(
            spec.properties[TEST_ROUTE],
            "${http.request.uri:equals('/Test_1_to_1')}"
        );

        let spec = output_router_spec(Location::default(), "/caf%C3%A9_flow");
        assert_eq!(
            spec.properties[TEST_ROUTE],
            "${http.request.uri:equals('/caf%C3%A9_flow')}"
        );
    }

    #[test]
    fn response_handler_echoes_test_attributes() {
        let spec = response_handler_spec(Location::default(), "ctx");
        assert_eq!(spec.properties["HTTP Context Map"], "ctx");
        assert_eq!(spec.properties["HTTP Status Code"], "200");
        assert_eq!(
            spec.properties["test_input_name"],
            "${http.headers.test_input_name}"
        );
        assert_eq!(spec.properties["test_duration"], "${test_duration}");
        for name in attributes::ECHOED {
            assert!(spec.properties.contains_key(*name), "missing {name}");
        }
        assert_eq!(spec.auto_terminated_relationships.len(), 2);
    }

    #[test]
    fn output_setter_stamps_name_and_end_time() {
        let spec = output_attribute_spec(Location::new(0.0, 1000.0), "P3");
        assert_eq!(spec.name, "Set output name 'P3'");
        assert_eq!(spec.properties["test_output_name"], "P3");
        assert_eq!(spec.properties["test_end_time"], "${now():toNumber()}");
        assert!(!spec.properties.contains_key("test_duration"));
        assert_eq!(spec.position.y, 1000.0);
    }

    #[test]
    fn duration_is_end_minus_start() {
        let spec = duration_spec(Location::default());
        assert_eq!(spec.name, DURATION_SETTER);
        assert_eq!(
            spec.properties["test_duration"],
            "${test_end_time:minus(${test_start_time})}"
        );
        assert_eq!(spec.properties.len(), 1);
    }

    #[test]
    fn request_handler_binds_port() {
        let spec = request_handler_spec(Location::default(), "ctx", 9090);
        assert_eq!(spec.properties["Listening Port"], "9090");
        assert_eq!(spec.processor_type, processor_types::HANDLE_HTTP_REQUEST);
    }

    #[test]
    fn content_wrapper_produces_json_template() {
        let spec = content_wrapper_spec(Location::default());
        let template = &spec.properties["Replacement Value"];
        assert!(template.starts_with("{\"flowfile\":\"$1\",\"attributes\":{"));
        assert!(template.contains("\"test_output_name\":\"${test_output_name}\""));
        assert!(template.contains("\"test_input_name\":\"${http.headers.test_input_name}\""));
        assert!(template.ends_with("}}"));
    }

    #[test]
    fn merger_waits_for_every_output() {
        let spec = output_merger_spec(Location::default(), 2);
        assert_eq!(spec.properties["Minimum Number of Entries"], "2");
        assert_eq!(spec.properties["Header"], "[");
        assert!(spec.auto_terminated_relationships.contains("original"));
    }
}
