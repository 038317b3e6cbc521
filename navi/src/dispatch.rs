use crate::errors::{Result, TaskError};
use crate::events::{EventKind, InstanceEvent};
use crate::metrics_defs::{EVENT_DURATION, EVENTS_PROCESSED};
use crate::reconciler::{Outcome, Reconciler};
use serde_json::Value;
use shared::{counter, histogram};
use std::time::Instant;

/// Routes validated instance events to the reconciler.
pub struct Dispatcher {
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler) -> Self {
        Dispatcher { reconciler }
    }

    /// Handles one inbound message. The error keeps the classification of
    /// the layer that produced it, so the transport can decide between
    /// dropping and redelivering the message.
    pub async fn handle(&self, event: &str, payload: &Value) -> Result<Outcome> {
        let start = Instant::now();
        let kind = event.parse::<EventKind>();
        let event_tag = kind.as_ref().map_or("unknown", EventKind::as_str);

        let result = match kind {
            Ok(kind) => self.dispatch(kind, payload).await,
            Err(err) => Err(err),
        };

        let outcome_tag = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(err) => err.kind(),
        };
        counter!(EVENTS_PROCESSED, "event" => event_tag, "outcome" => outcome_tag).increment(1);
        histogram!(EVENT_DURATION, "event" => event_tag).record(start.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => tracing::info!(
                event,
                outcome = outcome.as_str(),
                elastic_url = outcome.routing_key(),
                "event processed"
            ),
            Err(err @ TaskError::StaleUpdate { .. }) => {
                tracing::info!(event, error = %err, "dropping superseded event")
            }
            Err(err) if err.is_permanent() => {
                tracing::error!(event, error = %err, payload = %payload, "dropping event")
            }
            Err(err) => tracing::warn!(event, error = %err, "event failed, will be retried"),
        }

        result
    }

    async fn dispatch(&self, kind: EventKind, payload: &Value) -> Result<Outcome> {
        let InstanceEvent {
            kind,
            instance,
            timestamp,
        } = InstanceEvent::parse(kind, payload)?;

        match kind {
            EventKind::InstanceCreated | EventKind::InstanceUpdated => {
                self.reconciler.apply_update(instance, timestamp).await
            }
            EventKind::InstanceDeleted => self.reconciler.apply_delete(instance, timestamp).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, RoutingStore};
    use crate::testutils::{RecordingPublisher, StaticApi};
    use serde_json::json;
    use std::sync::Arc;

    fn setup(api: StaticApi) -> (Dispatcher, Arc<DocumentStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(DocumentStore::in_memory());
        let publisher = Arc::new(RecordingPublisher::default());
        let reconciler = Reconciler::new(store.clone(), Arc::new(api), publisher.clone());
        (Dispatcher::new(reconciler), store, publisher)
    }

    fn payload(timestamp: i64) -> Value {
        json!({
            "instance": {
                "shortHash": "m1",
                "name": "api",
                "masterPod": true,
                "elasticHostname": "api.example.com",
                "owner": { "github": 1234, "username": "Myztiq" },
                "container": {
                    "dockerHost": "http://10.0.0.1:4242",
                    "ports": { "80/tcp": [{ "HostPort": "32823" }], "443/tcp": null },
                    "inspect": { "State": { "Running": true } }
                }
            },
            "timestamp": timestamp
        })
    }

    #[tokio::test]
    async fn test_created_then_older_update() {
        let (dispatcher, store, publisher) = setup(StaticApi::with_dependencies(vec![]));

        let outcome = dispatcher.handle("instance.created", &payload(1000)).await.unwrap();
        assert_eq!(outcome.routing_key(), Some("api.example.com"));

        let doc = store.get("api.example.com").await.unwrap().unwrap();
        let entry = &doc.entries["m1"];
        assert_eq!(entry.last_updated, 1000);
        assert_eq!(entry.host_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.ports.get("80").map(String::as_str), Some("32823"));
        assert_eq!(entry.ports.len(), 1);
        assert_eq!(publisher.wait_for(1).await, vec!["api.example.com"]);

        let err = dispatcher
            .handle("instance.updated", &payload(500))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(store.get("api.example.com").await.unwrap().unwrap(), doc);
        publisher.assert_quiet(1).await;
    }

    #[tokio::test]
    async fn test_delete_event() {
        let (dispatcher, store, publisher) = setup(StaticApi::with_dependencies(vec![]));
        dispatcher.handle("instance.created", &payload(1000)).await.unwrap();

        let outcome = dispatcher.handle("instance.deleted", &payload(2000)).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Removed {
                document_deleted: true,
                ..
            }
        ));
        assert!(store.list().await.unwrap().is_empty());
        publisher.wait_for(2).await;
    }

    #[tokio::test]
    async fn test_validation_happens_before_reconciling() {
        // An API that would fail transiently proves the reconciler is never
        // reached for invalid payloads.
        let (dispatcher, store, _publisher) = setup(StaticApi::unavailable());

        for payload in [json!(null), json!({ "timestamp": 1 }), json!({ "instance": {} })] {
            let err = dispatcher.handle("instance.updated", &payload).await.unwrap_err();
            assert!(matches!(err, TaskError::InvalidEvent(_)), "{payload}");
            assert!(err.is_permanent());
        }

        let err = dispatcher.handle("instance.renamed", &payload(1)).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownEvent(_)));

        let err = dispatcher.handle("instance.updated", &payload(1)).await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_event() {
        let store = Arc::new(DocumentStore::in_memory());
        let publisher = Arc::new(RecordingPublisher::failing());
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(StaticApi::with_dependencies(vec![])),
            publisher.clone(),
        );
        let dispatcher = Dispatcher::new(reconciler);

        dispatcher.handle("instance.updated", &payload(1000)).await.unwrap();
        publisher.wait_for(1).await;
        assert!(store.get("api.example.com").await.unwrap().is_some());
    }
}
