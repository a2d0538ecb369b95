//! Task definitions carried by outbox rows

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::NewOutboxMessage;

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";

/// Payload of [`TASK_SEND_VERIFY_EMAIL`], keyed by the user's email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyEmailPayload {
    pub email: String,
}

/// Delivery options attached to an enqueued task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub max_retry: i32,
    /// Earliest processing time relative to enqueue
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    pub queue: String,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retry: 10,
            delay: Duration::from_secs(10),
            queue: QUEUE_CRITICAL.to_string(),
        }
    }
}

impl TaskOptions {
    /// Outbox row for `task_type` with these options
    pub fn message<P: Serialize>(
        &self,
        task_type: &str,
        payload: &P,
    ) -> Result<NewOutboxMessage, serde_json::Error> {
        Ok(NewOutboxMessage {
            task_type: task_type.to_string(),
            payload: serde_json::to_value(payload)?,
            queue: self.queue.clone(),
            max_retry: self.max_retry,
            delay_secs: i64::try_from(self.delay.as_secs()).unwrap_or(i64::MAX),
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
