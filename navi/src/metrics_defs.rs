//! Metrics definitions for the routing sync worker.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_PROCESSED: MetricDef = MetricDef {
    name: "events.processed",
    metric_type: MetricType::Counter,
    description: "Number of instance events handled. Tagged with event, outcome.",
};

pub const EVENT_DURATION: MetricDef = MetricDef {
    name: "event.duration",
    metric_type: MetricType::Histogram,
    description: "Time to handle one instance event in seconds. Tagged with event.",
};

pub const EVENTS_INFLIGHT: MetricDef = MetricDef {
    name: "events.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of instance events currently being processed",
};

pub const STALE_WRITES: MetricDef = MetricDef {
    name: "reconciler.stale_writes",
    metric_type: MetricType::Counter,
    description: "Updates rejected because a newer entry was already stored",
};

pub const DOCUMENTS_REMOVED: MetricDef = MetricDef {
    name: "reconciler.documents_removed",
    metric_type: MetricType::Counter,
    description: "Routing documents deleted after their last entry was removed",
};

pub const CLEANUP_FAILURES: MetricDef = MetricDef {
    name: "reconciler.cleanup_failures",
    metric_type: MetricType::Counter,
    description: "Empty routing documents left behind because the cleanup delete failed",
};

pub const INVALIDATIONS_PUBLISHED: MetricDef = MetricDef {
    name: "invalidations.published",
    metric_type: MetricType::Counter,
    description: "Cache invalidation notifications published",
};

pub const INVALIDATIONS_FAILED: MetricDef = MetricDef {
    name: "invalidations.failed",
    metric_type: MetricType::Counter,
    description: "Cache invalidation notifications that could not be published",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_PROCESSED,
    EVENT_DURATION,
    EVENTS_INFLIGHT,
    STALE_WRITES,
    DOCUMENTS_REMOVED,
    CLEANUP_FAILURES,
    INVALIDATIONS_PUBLISHED,
    INVALIDATIONS_FAILED,
];
