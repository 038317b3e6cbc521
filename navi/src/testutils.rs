use crate::api::{ApiError, InstanceApi, InstanceHandle};
use crate::publisher::{PublishError, Publisher};
use crate::types::{DirectEntry, InstanceDescriptor, Owner, RawDependency, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

pub const USER_CONTENT_DOMAIN: &str = "runnableapp.com";

pub fn instance(short_id: &str, name: &str) -> InstanceDescriptor {
    InstanceDescriptor {
        short_id: short_id.into(),
        name: name.into(),
        is_isolated: false,
        is_isolation_group_master: false,
        is_master_instance: true,
        owner: Owner {
            id: 1234,
            username: "Myztiq".into(),
        },
        container: None,
        context_version: None,
        ip_whitelist: None,
        elastic_hostname: None,
        hostname: None,
        branch: None,
    }
}

pub fn entry(last_updated: Timestamp) -> DirectEntry {
    DirectEntry {
        branch: Some("master".into()),
        url: "m1-api-staging-myztiq.runnableapp.com".into(),
        dependencies: vec![],
        host_address: None,
        ports: BTreeMap::new(),
        running: true,
        last_updated,
        is_master_instance: true,
        build_removed: false,
    }
}

enum Dependencies {
    Found(Vec<RawDependency>),
    NotFound,
    Unavailable,
}

/// Instance API double answering every dependency lookup the same way.
pub struct StaticApi {
    dependencies: Dependencies,
}

impl StaticApi {
    pub fn with_dependencies(dependencies: Vec<RawDependency>) -> Self {
        StaticApi {
            dependencies: Dependencies::Found(dependencies),
        }
    }

    pub fn not_found() -> Self {
        StaticApi {
            dependencies: Dependencies::NotFound,
        }
    }

    pub fn unavailable() -> Self {
        StaticApi {
            dependencies: Dependencies::Unavailable,
        }
    }
}

#[async_trait]
impl InstanceApi for StaticApi {
    fn new_instance(&self, attrs: InstanceDescriptor) -> InstanceHandle {
        InstanceHandle::new(attrs, USER_CONTENT_DOMAIN)
    }

    async fn fetch_dependencies(
        &self,
        _instance: &InstanceHandle,
    ) -> Result<Vec<RawDependency>, ApiError> {
        match &self.dependencies {
            Dependencies::Found(deps) => Ok(deps.clone()),
            Dependencies::NotFound => Err(ApiError::NotFound),
            Dependencies::Unavailable => Err(ApiError::Status(503)),
        }
    }
}

/// Records every routing key it is asked to publish.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        RecordingPublisher {
            published: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Publishing is spawned, so wait until `count` notifications arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            {
                let published = self.published.lock();
                if published.len() >= count {
                    return published.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} notifications, got {:?}",
            self.published.lock()
        );
    }

    /// Gives spawned publishes a chance to run, then checks that no more than
    /// `count` were made.
    pub async fn assert_quiet(&self, count: usize) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(self.published.lock().len(), count);
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_cache_invalidated(&self, routing_key: &str) -> Result<(), PublishError> {
        self.published.lock().push(routing_key.to_string());
        match self.failing {
            true => Err(PublishError::Status(503)),
            false => Ok(()),
        }
    }
}
