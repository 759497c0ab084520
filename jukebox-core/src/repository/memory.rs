use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{check_transition, QueueStore};
use crate::models::{ItemId, NewQueueItem, ParticipantId, QueueItem, QueueStage};
use crate::{Error, Result};

struct Entry {
    item: QueueItem,
    /// Bumped on every insert and transition; orders history reads.
    changed_seq: u64,
    insert_seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Drop the oldest history rows beyond `cap`.
    fn evict_history(&mut self, cap: usize) {
        let mut seqs: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.item.stage == QueueStage::History)
            .map(|e| e.changed_seq)
            .collect();
        if seqs.len() <= cap {
            return;
        }
        seqs.sort_unstable_by(|a, b| b.cmp(a));
        let newest_dropped = seqs[cap];
        self.entries
            .retain(|e| e.item.stage != QueueStage::History || e.changed_seq > newest_dropped);
    }
}

/// Queue store kept in process memory. Used by tests and `--in-memory` runs.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    /// Unbounded when `None`
    history_cap: Option<usize>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` history rows; older ones are forgotten.
    #[must_use]
    pub fn with_history_cap(cap: usize) -> Self {
        Self {
            history_cap: Some(cap),
            ..Self::default()
        }
    }

    /// Number of stored items in `stage`.
    #[must_use]
    pub fn count(&self, stage: QueueStage) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.item.stage == stage)
            .count()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn get_queue(&self, stage: QueueStage, limit: Option<usize>) -> Result<Vec<QueueItem>> {
        let inner = self.inner.lock();
        let mut matching: Vec<&Entry> = inner
            .entries
            .iter()
            .filter(|e| e.item.stage == stage)
            .collect();

        match stage {
            QueueStage::History => matching.sort_by(|a, b| b.changed_seq.cmp(&a.changed_seq)),
            QueueStage::Upcoming | QueueStage::Active => matching.sort_by(|a, b| {
                a.item
                    .created_at
                    .cmp(&b.item.created_at)
                    .then(a.insert_seq.cmp(&b.insert_seq))
            }),
        }

        Ok(matching
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| e.item.clone())
            .collect())
    }

    async fn get_active_item(&self) -> Result<Option<QueueItem>> {
        Ok(self
            .inner
            .lock()
            .entries
            .iter()
            .find(|e| e.item.stage == QueueStage::Active)
            .map(|e| e.item.clone()))
    }

    async fn get_head_of_upcoming(&self) -> Result<Option<QueueItem>> {
        Ok(self
            .get_queue(QueueStage::Upcoming, Some(1))
            .await?
            .into_iter()
            .next())
    }

    async fn insert_item(&self, item: NewQueueItem, stage: QueueStage) -> Result<QueueItem> {
        let mut inner = self.inner.lock();
        if stage == QueueStage::Active
            && inner.entries.iter().any(|e| e.item.stage == QueueStage::Active)
        {
            return Err(Error::InvalidInput("An active item already exists".to_string()));
        }

        let item = QueueItem::from_new(item, stage, Utc::now());
        let seq = inner.next_seq();
        inner.entries.push(Entry {
            item: item.clone(),
            changed_seq: seq,
            insert_seq: seq,
        });
        Ok(item)
    }

    async fn transition_stage(
        &self,
        id: &ItemId,
        from: QueueStage,
        to: QueueStage,
    ) -> Result<QueueItem> {
        check_transition(from, to)?;

        let mut inner = self.inner.lock();
        if to == QueueStage::Active
            && inner
                .entries
                .iter()
                .any(|e| e.item.stage == QueueStage::Active && &e.item.id != id)
        {
            return Err(Error::InvalidInput("An active item already exists".to_string()));
        }

        let seq = inner.next_seq();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.item.id == id)
            .ok_or_else(|| Error::NotFound(format!("Queue item {id}")))?;

        if entry.item.stage != from {
            return Err(Error::InvalidInput(format!(
                "Item {id} is {}, expected {from}",
                entry.item.stage
            )));
        }

        entry.item.stage = to;
        entry.changed_seq = seq;
        let item = entry.item.clone();

        if let (QueueStage::History, Some(cap)) = (to, self.history_cap) {
            inner.evict_history(cap);
        }
        Ok(item)
    }

    async fn count_upcoming_by(&self, submitter: &ParticipantId) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.item.stage == QueueStage::Upcoming && &e.item.submitted_by == submitter)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VideoMetadata, VideoRef};

    fn new_item(id: &str, submitter: &str) -> NewQueueItem {
        NewQueueItem {
            video_ref: VideoRef::parse(id).unwrap(),
            metadata: VideoMetadata {
                title: format!("title {id}"),
                duration_secs: 180,
                thumbnail_url: String::new(),
                is_live: false,
            },
            submitted_by: ParticipantId::from(submitter),
            submitter_name: submitter.to_string(),
            submitter_avatar: None,
        }
    }

    #[tokio::test]
    async fn test_upcoming_is_fifo() {
        let store = MemoryQueueStore::new();
        let a = store.insert_item(new_item("aaaaaaaaaaa", "p1"), QueueStage::Upcoming).await.unwrap();
        let b = store.insert_item(new_item("bbbbbbbbbbb", "p1"), QueueStage::Upcoming).await.unwrap();
        let c = store.insert_item(new_item("ccccccccccc", "p2"), QueueStage::Upcoming).await.unwrap();

        let queue = store.get_queue(QueueStage::Upcoming, None).await.unwrap();
        let ids: Vec<_> = queue.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id, c.id]);
        assert_eq!(store.get_head_of_upcoming().await.unwrap().unwrap().id, a.id);
        assert_eq!(store.get_queue(QueueStage::Upcoming, Some(2)).await.unwrap().len(), 2);
        assert_eq!(store.count_upcoming_by(&ParticipantId::from("p1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_single_active_enforced() {
        let store = MemoryQueueStore::new();
        let a = store.insert_item(new_item("aaaaaaaaaaa", "p1"), QueueStage::Upcoming).await.unwrap();
        let b = store.insert_item(new_item("bbbbbbbbbbb", "p1"), QueueStage::Upcoming).await.unwrap();

        store.transition_stage(&a.id, QueueStage::Upcoming, QueueStage::Active).await.unwrap();
        let second = store.transition_stage(&b.id, QueueStage::Upcoming, QueueStage::Active).await;
        assert!(matches!(second, Err(Error::InvalidInput(_))));

        let direct = store.insert_item(new_item("ccccccccccc", "p1"), QueueStage::Active).await;
        assert!(matches!(direct, Err(Error::InvalidInput(_))));
        assert_eq!(store.count(QueueStage::Active), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryQueueStore::new();
        let a = store.insert_item(new_item("aaaaaaaaaaa", "p1"), QueueStage::Upcoming).await.unwrap();

        let skip = store.transition_stage(&a.id, QueueStage::Upcoming, QueueStage::History).await;
        assert!(matches!(skip, Err(Error::InvalidInput(_))));

        let wrong_from = store.transition_stage(&a.id, QueueStage::Active, QueueStage::History).await;
        assert!(matches!(wrong_from, Err(Error::InvalidInput(_))));

        let missing = store
            .transition_stage(&ItemId::from("nope"), QueueStage::Upcoming, QueueStage::Active)
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let store = MemoryQueueStore::new();
        let a = store.insert_item(new_item("aaaaaaaaaaa", "p1"), QueueStage::Upcoming).await.unwrap();
        let b = store.insert_item(new_item("bbbbbbbbbbb", "p1"), QueueStage::Upcoming).await.unwrap();

        for item in [&a, &b] {
            store.transition_stage(&item.id, QueueStage::Upcoming, QueueStage::Active).await.unwrap();
            store.transition_stage(&item.id, QueueStage::Active, QueueStage::History).await.unwrap();
        }

        let history = store.get_queue(QueueStage::History, None).await.unwrap();
        assert_eq!(history[0].id, b.id);
        assert_eq!(history[1].id, a.id);
        assert!(store.get_active_item().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_cap_evicts_oldest() {
        let store = MemoryQueueStore::with_history_cap(2);
        let mut played = Vec::new();
        for raw in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"] {
            let item = store.insert_item(new_item(raw, "p1"), QueueStage::Upcoming).await.unwrap();
            store.transition_stage(&item.id, QueueStage::Upcoming, QueueStage::Active).await.unwrap();
            store.transition_stage(&item.id, QueueStage::Active, QueueStage::History).await.unwrap();
            played.push(item.id);
        }
        let pending = store.insert_item(new_item("ddddddddddd", "p1"), QueueStage::Upcoming).await.unwrap();

        let history: Vec<_> = store
            .get_queue(QueueStage::History, None)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(history, vec![played[2].clone(), played[1].clone()]);
        assert_eq!(store.count(QueueStage::History), 2);
        // other stages are untouched
        assert_eq!(store.get_head_of_upcoming().await.unwrap().unwrap().id, pending.id);
    }
}
