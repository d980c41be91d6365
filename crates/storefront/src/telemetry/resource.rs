//! Service identity attached to every span, log record and metric.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{
    SERVICE_INSTANCE_ID, SERVICE_NAME, SERVICE_VERSION,
};

/// Semantic-conventions schema the resource attributes follow.
pub const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.11.0";

/// Build the shared resource. The host name is used as the instance id; if it
/// cannot be read the attribute is present but empty.
pub fn build(service_name: &str) -> Resource {
    with_instance(service_name, instance_id())
}

fn instance_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}

fn with_instance(service_name: &str, instance_id: String) -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, service_name.to_owned()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new(SERVICE_INSTANCE_ID, instance_id),
        ],
        SCHEMA_URL,
    )
}
