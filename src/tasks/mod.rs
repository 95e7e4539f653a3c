//! Background jobs for the parley server

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::RecycleBinConfig;
use crate::db::ConversationStore;
use crate::error::AppError;

/// Permanently delete conversations that sat in the recycle bin longer than `retention_days`.
///
/// A retention of zero or less keeps recycled conversations forever.
pub async fn purge_recycle_bin(store: &dyn ConversationStore, retention_days: i64) -> Result<u64, AppError> {
    if retention_days <= 0 {
        debug!("Recycle bin retention disabled, nothing to purge");
        return Ok(0);
    }

    let cutoff = ChronoDuration::try_days(retention_days)
        .and_then(|retention| Utc::now().checked_sub_signed(retention))
        .ok_or_else(|| AppError::Config(format!("recycle bin retention of {} days is out of range", retention_days)))?;
    let purged = store.permanent_delete_before(cutoff).await?;
    if purged > 0 {
        info!("Purged {} conversations deleted before {}", purged, cutoff.to_rfc3339());
    }
    Ok(purged)
}

pub fn spawn_recycle_bin_purge(store: Arc<dyn ConversationStore>, config: RecycleBinConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = purge_recycle_bin(store.as_ref(), config.retention_days).await {
                error!("Recycle bin purge failed: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(config.purge_interval_secs)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbOperations, UserStore};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let db = DbOperations::in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        db.ensure_user(user_id, "u@example.com").await.unwrap();

        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();
        db.soft_delete(user_id, conversation.id).await.unwrap();

        assert_eq!(purge_recycle_bin(&db, 30).await.unwrap(), 0);
        assert_eq!(db.list_deleted(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_recycle_bin() {
        let db = DbOperations::in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        db.ensure_user(user_id, "u@example.com").await.unwrap();

        let conversation = db.ensure_conversation(user_id, None, "m").await.unwrap();
        db.soft_delete(user_id, conversation.id).await.unwrap();

        assert_eq!(purge_recycle_bin(&db, 0).await.unwrap(), 0);
        assert_eq!(purge_recycle_bin(&db, -5).await.unwrap(), 0);
        assert_eq!(db.list_deleted(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_retention_is_an_error() {
        let db = DbOperations::in_memory().await.unwrap();
        let err = purge_recycle_bin(&db, i64::MAX).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
