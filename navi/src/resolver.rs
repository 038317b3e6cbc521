//! Derives the `directUrls` key an instance is stored under.
//!
//! Members of an isolation group are named `<masterShortHash>--<name>`, and
//! every non-master member is routed through its master's entry.

use crate::types::{Dependency, InstanceDescriptor, RawDependency, ShortId};
use regex::Regex;
use std::sync::LazyLock;

static ISOLATED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]*)--").expect("isolated name pattern is valid")
});

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("instance name {0:?} does not embed an isolation group master short hash")]
    MalformedIsolatedName(String),
}

/// Returns the isolation group master's short hash embedded in `name`.
pub fn extract_isolated_master_short_id(name: &str) -> Result<ShortId, ResolveError> {
    ISOLATED_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ResolveError::MalformedIsolatedName(name.to_string()))
}

pub fn resolve_short_id(instance: &InstanceDescriptor) -> Result<ShortId, ResolveError> {
    if instance.is_isolated && !instance.is_isolation_group_master {
        extract_isolated_master_short_id(&instance.name)
    } else {
        Ok(instance.short_id.clone())
    }
}

/// Dependencies never fail resolution: an isolated dependency with an
/// unexpected name is simply left unannotated.
pub fn annotate_dependency(raw: &RawDependency) -> Dependency {
    let isolation_master_short_id = raw
        .isolated
        .then(|| extract_isolated_master_short_id(&raw.name).ok())
        .flatten();

    Dependency {
        short_id: raw.short_hash.clone(),
        routing_key: raw.hostname.clone(),
        isolation_master_short_id,
    }
}
