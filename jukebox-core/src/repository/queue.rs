use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use super::{check_transition, QueueStore};
use crate::models::{ItemId, NewQueueItem, ParticipantId, QueueItem, QueueStage};
use crate::{Error, Result};

const COLUMNS: &str = "id, video_ref, title, duration_secs, thumbnail_url, submitted_by, \
                       submitter_name, submitter_avatar, stage, created_at";

/// Postgres-backed queue store
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn get_queue(&self, stage: QueueStage, limit: Option<usize>) -> Result<Vec<QueueItem>> {
        let order = match stage {
            QueueStage::History => "stage_changed_at DESC, created_at DESC",
            QueueStage::Upcoming | QueueStage::Active => "created_at ASC, id ASC",
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM queue_items WHERE stage = $1 ORDER BY {order} LIMIT $2"
        );
        // LIMIT NULL is LIMIT ALL
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query(&sql)
            .bind(stage)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(QueueItem::from_row(row)?))
            .collect()
    }

    async fn get_active_item(&self) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {COLUMNS} FROM queue_items WHERE stage = 'active' LIMIT 1");
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        row.map(|row| QueueItem::from_row(&row)).transpose().map_err(Into::into)
    }

    async fn get_head_of_upcoming(&self) -> Result<Option<QueueItem>> {
        Ok(self
            .get_queue(QueueStage::Upcoming, Some(1))
            .await?
            .into_iter()
            .next())
    }

    async fn insert_item(&self, item: NewQueueItem, stage: QueueStage) -> Result<QueueItem> {
        let duration = i32::try_from(item.metadata.duration_secs)
            .map_err(|_| Error::InvalidInput("Duration out of range".to_string()))?;

        let sql = format!(
            r"
            INSERT INTO queue_items (id, video_ref, title, duration_secs, thumbnail_url,
                                     submitted_by, submitter_name, submitter_avatar, stage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {COLUMNS}
            "
        );

        // the partial unique index on stage = 'active' turns a second active
        // row into a unique violation, mapped to InvalidInput
        let row = sqlx::query(&sql)
            .bind(ItemId::new())
            .bind(&item.video_ref)
            .bind(&item.metadata.title)
            .bind(duration)
            .bind(&item.metadata.thumbnail_url)
            .bind(&item.submitted_by)
            .bind(&item.submitter_name)
            .bind(&item.submitter_avatar)
            .bind(stage)
            .fetch_one(&self.pool)
            .await?;

        Ok(QueueItem::from_row(&row)?)
    }

    async fn transition_stage(
        &self,
        id: &ItemId,
        from: QueueStage,
        to: QueueStage,
    ) -> Result<QueueItem> {
        check_transition(from, to)?;

        let sql = format!(
            r"
            UPDATE queue_items
            SET stage = $3, stage_changed_at = NOW()
            WHERE id = $1 AND stage = $2
            RETURNING {COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(QueueItem::from_row(&row)?);
        }

        let current: Option<QueueStage> =
            sqlx::query_scalar("SELECT stage FROM queue_items WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(stage) => Err(Error::InvalidInput(format!(
                "Item {id} is {stage}, expected {from}"
            ))),
            None => Err(Error::NotFound(format!("Queue item {id}"))),
        }
    }

    async fn count_upcoming_by(&self, submitter: &ParticipantId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE stage = 'upcoming' AND submitted_by = $1",
        )
        .bind(submitter)
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VideoMetadata, VideoRef};

    async fn connect() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::migrate!("../migrations").run(&pool).await.ok()?;
        sqlx::query("DELETE FROM queue_items").execute(&pool).await.ok()?;
        Some(pool)
    }

    fn new_item(id: &str, title: &str) -> NewQueueItem {
        NewQueueItem {
            video_ref: VideoRef::parse(id).unwrap(),
            metadata: VideoMetadata {
                title: title.to_string(),
                duration_secs: 200,
                thumbnail_url: String::new(),
                is_live: false,
            },
            submitted_by: ParticipantId::from("p1"),
            submitter_name: "Ola".to_string(),
            submitter_avatar: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_lifecycle_against_postgres() {
        let Some(pool) = connect().await else { return };
        let store = PgQueueStore::new(pool);

        let first = store
            .insert_item(new_item("aaaaaaaaaaa", "First"), QueueStage::Upcoming)
            .await
            .unwrap();
        store
            .insert_item(new_item("bbbbbbbbbbb", "Second"), QueueStage::Upcoming)
            .await
            .unwrap();

        let head = store.get_head_of_upcoming().await.unwrap().unwrap();
        assert_eq!(head.id, first.id);
        assert_eq!(store.count_upcoming_by(&ParticipantId::from("p1")).await.unwrap(), 2);

        store
            .transition_stage(&first.id, QueueStage::Upcoming, QueueStage::Active)
            .await
            .unwrap();
        let again = store
            .transition_stage(&first.id, QueueStage::Upcoming, QueueStage::Active)
            .await;
        assert!(matches!(again, Err(Error::InvalidInput(_))));

        let second_active = store
            .insert_item(new_item("ccccccccccc", "Third"), QueueStage::Active)
            .await;
        assert!(matches!(second_active, Err(Error::InvalidInput(_))));

        store
            .transition_stage(&first.id, QueueStage::Active, QueueStage::History)
            .await
            .unwrap();
        let history = store.get_queue(QueueStage::History, Some(10)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(store.get_active_item().await.unwrap().is_none());
    }
}
