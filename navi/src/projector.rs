//! Builds the `directUrls` entry for an instance.

use crate::api::{InstanceApi, InstanceHandle};
use crate::errors::Result;
use crate::resolver::annotate_dependency;
use crate::types::{DirectEntry, PortBinding, Timestamp};
use std::collections::BTreeMap;
use url::Url;

/// Maps each exposed container port (`"80/tcp"`) to the first host port it is
/// bound to. Ports without a binding are skipped.
pub fn project_ports(
    ports: Option<&BTreeMap<String, Option<Vec<PortBinding>>>>,
) -> BTreeMap<String, String> {
    let Some(ports) = ports else {
        return BTreeMap::new();
    };

    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let host_port = bindings.as_ref()?.first()?.host_port.clone()?;
            let internal = key.split('/').next().unwrap_or(key);
            Some((internal.to_string(), host_port))
        })
        .collect()
}

/// Extracts the host portion of a docker host URL such as `http://10.0.0.1:4242`.
pub fn project_host_address(docker_host: Option<&str>) -> Option<String> {
    let docker_host = docker_host?;
    match Url::parse(docker_host) {
        Ok(url) => url.host_str().map(str::to_string),
        Err(err) => {
            tracing::warn!(docker_host, error = %err, "could not parse docker host");
            None
        }
    }
}

/// Fetches the instance's dependencies and assembles its entry.
///
/// `timestamp` is the event's declared time and becomes the entry's
/// `lastUpdated`, which every later write is compared against.
pub async fn project(
    api: &dyn InstanceApi,
    instance: &InstanceHandle,
    timestamp: Timestamp,
) -> Result<DirectEntry> {
    let dependencies = api
        .fetch_dependencies(instance)
        .await?
        .iter()
        .map(annotate_dependency)
        .collect();

    let attrs = &instance.attrs;
    let container = attrs.container.as_ref();

    let ports = project_ports(container.and_then(|c| c.ports.as_ref()));
    let running = attrs.is_running();
    if ports.is_empty() {
        tracing::warn!(
            short_hash = %attrs.short_id,
            running,
            "instance does not expose any ports"
        );
    }

    Ok(DirectEntry {
        branch: instance.branch_name(),
        url: instance.container_hostname(),
        dependencies,
        host_address: project_host_address(container.and_then(|c| c.docker_host.as_deref())),
        ports,
        running,
        last_updated: timestamp,
        is_master_instance: attrs.is_master_instance,
        build_removed: attrs.is_build_removed(),
    })
}
