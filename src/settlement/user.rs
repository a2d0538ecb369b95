//! User creation and email verification
//!
//! Creating a user also writes a `task:send_verify_email` outbox row in the
//! same transaction. The row is handed to the task queue later by
//! [`OutboxPublisher`](crate::outbox::OutboxPublisher), so a rolled-back
//! registration never sends an email and a committed one is never silently
//! dropped.

use tracing::info;

use super::SettlementService;
use crate::core_types::VerifyEmailId;
use crate::error::{SettlementError, StoreContext};
use crate::models::{CreatedUser, NewUser, VerifiedEmail};
use crate::outbox::task::{TASK_SEND_VERIFY_EMAIL, VerifyEmailPayload};
use crate::store::{Store, StoreTx};

impl<S: Store> SettlementService<S> {
    pub async fn create_user(&self, new_user: NewUser) -> Result<CreatedUser, SettlementError> {
        let message = self
            .verify_email_task
            .message(
                TASK_SEND_VERIFY_EMAIL,
                &VerifyEmailPayload {
                    email: new_user.email.clone(),
                },
            )
            .map_err(|e| SettlementError::Internal(format!("failed to encode task payload: {e}")))?;

        let created = self
            .executor
            .exec_tx("create_user", move |tx| {
                Box::pin(async move {
                    let user = tx
                        .insert_user(&new_user)
                        .await
                        .context("failed to create user")?;
                    let outbox = tx
                        .insert_outbox(&message)
                        .await
                        .context("failed to enqueue verification email")?;
                    Ok(CreatedUser {
                        user,
                        outbox_id: outbox.id,
                    })
                })
            })
            .await?;

        info!(
            user_id = %created.user.id,
            username = %created.user.username,
            outbox_id = created.outbox_id,
            "User created"
        );
        Ok(created)
    }

    /// Consume a verification code and mark its user verified
    pub async fn verify_email(
        &self,
        id: VerifyEmailId,
        secret_code: String,
    ) -> Result<VerifiedEmail, SettlementError> {
        let verified = self
            .executor
            .exec_tx("verify_email", move |tx| {
                Box::pin(async move {
                    let verify_email = tx
                        .consume_verify_email(id, &secret_code)
                        .await
                        .context("failed to consume verification code")?;
                    let user = tx
                        .mark_user_verified(&verify_email.username)
                        .await
                        .context("failed to mark user verified")?;
                    Ok(VerifiedEmail { user, verify_email })
                })
            })
            .await?;

        info!(
            user_id = %verified.user.id,
            verify_email_id = id,
            "Email verified"
        );
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StoreError};
    use crate::models::{OutboxStatus, UserRole};
    use crate::outbox::task::TaskOptions;
    use crate::store::{FaultPoint, MemoryStore};
    use chrono::Duration;
    use std::sync::Arc;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: "$argon2id$v=19$stub".to_string(),
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn test_create_user_writes_outbox_row() {
        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(store.clone());

        let created = service.create_user(new_user("alice")).await.unwrap();

        let outbox = store.outbox_messages().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].id, created.outbox_id);
        assert_eq!(outbox[0].task_type, TASK_SEND_VERIFY_EMAIL);
        assert_eq!(outbox[0].payload["email"], "alice@example.com");
        assert_eq!(outbox[0].queue, "critical");
        assert_eq!(outbox[0].max_retry, 10);
        assert_eq!(outbox[0].delay_secs, 10);
        assert_eq!(outbox[0].status, OutboxStatus::Pending);
        assert!(!created.user.is_verified);
    }

    #[tokio::test]
    async fn test_custom_task_options() {
        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(store.clone()).with_verify_email_task(TaskOptions {
            max_retry: 2,
            delay: std::time::Duration::ZERO,
            queue: "default".into(),
        });

        service.create_user(new_user("alice")).await.unwrap();

        let outbox = store.outbox_messages().await;
        assert_eq!(outbox[0].max_retry, 2);
        assert_eq!(outbox[0].delay_secs, 0);
        assert_eq!(outbox[0].queue, "default");
    }

    #[tokio::test]
    async fn test_outbox_failure_drops_user() {
        let store = Arc::new(MemoryStore::new());
        store.inject_fault(FaultPoint::InsertOutbox, StoreError::Internal("disk full".into()));
        let service = SettlementService::new(store.clone());

        let err = service.create_user(new_user("alice")).await.unwrap_err();

        assert!(err.to_string().starts_with("failed to enqueue verification email"));
        assert!(store.outbox_messages().await.is_empty());
        // Username is free again
        service.create_user(new_user("alice")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(store.clone());
        service.create_user(new_user("alice")).await.unwrap();

        let err = service.create_user(new_user("alice")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_email_marks_owner() {
        let store = Arc::new(MemoryStore::new());
        let bystander = store.seed_user("bob", "bob@example.com").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        let record = store.seed_verify_email(&user, "s3cret", Duration::minutes(15)).await;
        let service = SettlementService::new(store.clone());

        let verified = service
            .verify_email(record.id, "s3cret".into())
            .await
            .unwrap();

        assert_eq!(verified.user.id, user.id);
        assert!(verified.user.is_verified);
        assert!(verified.verify_email.is_used);
        assert!(!store.user(bystander.id).await.unwrap().is_verified);
    }

    #[tokio::test]
    async fn test_verify_email_rejects_bad_code_and_reuse() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", "alice@example.com").await;
        let record = store.seed_verify_email(&user, "s3cret", Duration::minutes(15)).await;
        let service = SettlementService::new(store.clone());

        let err = service.verify_email(record.id, "wrong".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        service.verify_email(record.id, "s3cret".into()).await.unwrap();
        let err = service.verify_email(record.id, "s3cret".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_verify_email_expired() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", "alice@example.com").await;
        let record = store.seed_verify_email(&user, "s3cret", Duration::minutes(-1)).await;
        let service = SettlementService::new(store.clone());

        let err = service.verify_email(record.id, "s3cret".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!store.user(user.id).await.unwrap().is_verified);
    }

    #[tokio::test]
    async fn test_verify_email_is_atomic() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", "alice@example.com").await;
        let record = store.seed_verify_email(&user, "s3cret", Duration::minutes(15)).await;
        store.inject_fault(
            FaultPoint::MarkUserVerified,
            StoreError::Conflict("40001".into()),
        );
        let service = SettlementService::new(store.clone());

        let err = service.verify_email(record.id, "s3cret".into()).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(!store.verify_email(record.id).await.unwrap().is_used);
        assert!(!store.user(user.id).await.unwrap().is_verified);
    }
}
