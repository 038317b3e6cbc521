pub mod logging;
pub mod metrics;
pub mod metrics_defs;
