//! Inbound `instance.*` events and their validation.
//!
//! Payloads are checked before anything touches the store or the API; every
//! failure here is permanent.

use crate::errors::{Result, TaskError};
use crate::types::{InstanceDescriptor, Timestamp};
use serde_json::Value;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    InstanceCreated,
    InstanceUpdated,
    InstanceDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::InstanceCreated,
        EventKind::InstanceUpdated,
        EventKind::InstanceDeleted,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::InstanceCreated => "instance.created",
            EventKind::InstanceUpdated => "instance.updated",
            EventKind::InstanceDeleted => "instance.deleted",
        }
    }
}

impl FromStr for EventKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TaskError::UnknownEvent(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceEvent {
    pub kind: EventKind,
    pub instance: InstanceDescriptor,
    pub timestamp: Timestamp,
}

fn invalid(message: &str) -> TaskError {
    TaskError::InvalidEvent(message.to_string())
}

/// Accepts integral numbers only. A float is taken when it has no fractional
/// part and fits an `i64`; anything else would change the value compared by
/// the `lastUpdated` guard.
fn as_timestamp(value: &Value) -> Option<Timestamp> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(timestamp) = number.as_i64() {
        return Some(timestamp);
    }

    // u64 values above i64::MAX fail here as well.
    let float = number.as_f64()?;
    let in_range = float >= Timestamp::MIN as f64 && float < Timestamp::MAX as f64;
    (float.fract() == 0.0 && in_range).then_some(float as Timestamp)
}

impl InstanceEvent {
    pub fn parse(kind: EventKind, payload: &Value) -> Result<Self> {
        let job = payload
            .as_object()
            .ok_or_else(|| invalid("encountered non-object job"))?;

        let instance = job
            .get("instance")
            .filter(|value| value.is_object())
            .ok_or_else(|| invalid("job missing `instance` field of type object"))?;

        let timestamp = job
            .get("timestamp")
            .and_then(as_timestamp)
            .ok_or_else(|| invalid("job missing `timestamp` field of type integer"))?;

        if !instance
            .pointer("/owner/username")
            .is_some_and(Value::is_string)
        {
            return Err(invalid(
                "job.instance missing `owner.username` of type string",
            ));
        }

        if !instance
            .get("shortHash")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
        {
            return Err(invalid("job.instance missing `shortHash` of type string"));
        }

        if !instance.get("name").is_some_and(Value::is_string) {
            return Err(invalid("job.instance missing `name` of type string"));
        }

        let instance = serde_json::from_value(instance.clone())
            .map_err(|err| TaskError::InvalidEvent(format!("malformed instance: {err}")))?;

        Ok(InstanceEvent {
            kind,
            instance,
            timestamp,
        })
    }
}
