//! Transactional Outbox
//!
//! Side effects that target a second system (the task queue) are written as
//! outbox rows in the same store transaction as the change that triggers
//! them, then distributed by [`OutboxPublisher`].
//!
//! ```text
//! create_user ──tx──► users + outbox_messages(pending)
//!                                │
//!       OutboxPublisher ◄────────┘ claim (SKIP LOCKED)
//!             │
//!             ▼
//!       TaskDistributor ──► redis stream <prefix>:<queue>
//! ```

pub mod distributor;
pub mod publisher;
pub mod task;

pub use distributor::{DistributeError, MemoryDistributor, RedisTaskDistributor, TaskDistributor};
pub use publisher::{BatchReport, OutboxPublisher, PublisherConfig};
pub use task::{TASK_SEND_VERIFY_EMAIL, TaskOptions, VerifyEmailPayload};
