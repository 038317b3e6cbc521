use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Milliseconds since the unix epoch, as declared by the event producer.
pub type Timestamp = i64;

pub type ShortId = String;

/// Loose truthiness used by the API for flags that may be null, missing,
/// a boolean, or an identifier string.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(is_truthy(value.as_ref()))
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Owner {
    #[serde(rename = "github")]
    pub id: i64,
    pub username: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: Option<String>,
    #[serde(rename = "HostPort", default)]
    pub host_port: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ContainerState {
    #[serde(rename = "Running", default, deserialize_with = "truthy")]
    pub running: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ContainerInspect {
    #[serde(rename = "State", default)]
    pub state: Option<ContainerState>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub docker_host: Option<String>,
    #[serde(default)]
    pub ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default)]
    pub inspect: Option<ContainerInspect>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextVersionAttrs {
    #[serde(default, deserialize_with = "truthy")]
    pub dock_removed: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ContextVersion {
    #[serde(default)]
    pub attrs: Option<ContextVersionAttrs>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IpWhitelist {
    #[serde(default, deserialize_with = "truthy")]
    pub enabled: bool,
}

/// An application instance as carried by `instance.*` events.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescriptor {
    #[serde(rename = "shortHash")]
    pub short_id: ShortId,
    pub name: String,
    #[serde(rename = "isolated", default, deserialize_with = "truthy")]
    pub is_isolated: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub is_isolation_group_master: bool,
    #[serde(rename = "masterPod", default, deserialize_with = "truthy")]
    pub is_master_instance: bool,
    pub owner: Owner,
    #[serde(default)]
    pub container: Option<Container>,
    #[serde(default)]
    pub context_version: Option<ContextVersion>,
    #[serde(default)]
    pub ip_whitelist: Option<IpWhitelist>,
    #[serde(default)]
    pub elastic_hostname: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl InstanceDescriptor {
    pub fn is_running(&self) -> bool {
        self.container
            .as_ref()
            .and_then(|c| c.inspect.as_ref())
            .and_then(|i| i.state.as_ref())
            .is_some_and(|s| s.running)
    }

    pub fn is_build_removed(&self) -> bool {
        self.context_version
            .as_ref()
            .and_then(|cv| cv.attrs.as_ref())
            .is_some_and(|attrs| attrs.dock_removed)
    }

    pub fn access_control_enabled(&self) -> bool {
        self.ip_whitelist.as_ref().is_some_and(|w| w.enabled)
    }
}

/// A dependency as returned by the API, before isolation annotation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawDependency {
    pub hostname: String,
    pub name: String,
    pub short_hash: ShortId,
    #[serde(default, deserialize_with = "truthy")]
    pub isolated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    #[serde(rename = "shortHash")]
    pub short_id: ShortId,
    #[serde(rename = "elasticUrl")]
    pub routing_key: String,
    #[serde(
        rename = "isolatedMastersShortHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub isolation_master_short_id: Option<ShortId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectEntry {
    pub branch: Option<String>,
    pub url: String,
    pub dependencies: Vec<Dependency>,
    #[serde(rename = "dockerHost")]
    pub host_address: Option<String>,
    /// Container-internal port to externally exposed port.
    pub ports: BTreeMap<String, String>,
    pub running: bool,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Timestamp,
    #[serde(rename = "masterPod")]
    pub is_master_instance: bool,
    #[serde(rename = "dockRemoved")]
    pub build_removed: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessControl {
    pub enabled: bool,
}

/// The denormalized routing table of one elastic URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingDocument {
    #[serde(rename = "elasticUrl")]
    pub routing_key: String,
    #[serde(rename = "ownerGithubId")]
    pub owner_id: i64,
    #[serde(rename = "ownerUsername")]
    pub owner_name: String,
    #[serde(
        rename = "ipWhitelist",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_control: Option<AccessControl>,
    #[serde(rename = "directUrls", default)]
    pub entries: BTreeMap<ShortId, DirectEntry>,
}
