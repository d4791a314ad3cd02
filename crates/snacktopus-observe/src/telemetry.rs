//! Span helpers and attribute names shared by every Snacktopus service.
//!
//! Attribute constants are usable as dotted field names in `tracing` macros.

/// Logical operation name carried by [`traced_span`].
pub const SNACKTOPUS_SPAN: &str = "snacktopus.span";

/// Workflow instance a span belongs to.
pub const WORKFLOW_INSTANCE_ID: &str = "snacktopus.workflow.instance_id";

/// Registered workflow name.
pub const WORKFLOW_NAME: &str = "snacktopus.workflow.name";

/// Smoke check name (e.g. "dapr:state:roundtrip").
pub const SMOKE_CHECK: &str = "snacktopus.smoke.check";

/// Open an `info` span tagged with the logical operation `name`.
///
/// ```
/// let span = snacktopus_observe::telemetry::traced_span("seed_memory");
/// let _guard = span.enter();
/// ```
pub fn traced_span(name: &str) -> tracing::Span {
    tracing::info_span!("snacktopus.traced", snacktopus.span = name)
}
