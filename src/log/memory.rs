//! In-process log store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{LogEntry, LogStore};
use crate::error::ActionResult;

/// Keeps entries in a map. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: RwLock<HashMap<Uuid, LogEntry>>,
}

impl MemoryLogStore {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are none.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<LogEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.end_time >= from && e.end_time <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn store(&self, entry: &LogEntry) -> ActionResult<()> {
        self.entries.write().insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ActionResult<Option<LogEntry>> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>> {
        let mut entries = self.in_range(from, to);
        entries.sort_by(|a, b| b.end_time.cmp(&a.end_time).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn count_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> ActionResult<usize> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|e| e.end_time >= from && e.end_time <= to)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionInfo, ActionState};
    use chrono::Duration;

    fn entry(end: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            parent_id: None,
            info: ActionInfo::new("wait", "w"),
            final_state: ActionState::Succeeded,
            failure_message: None,
            start_time: end,
            end_time: end,
        }
    }

    #[tokio::test]
    async fn range_is_inclusive_and_newest_first() {
        let store = MemoryLogStore::default();
        let now = Utc::now();
        let old = entry(now - Duration::hours(2));
        let mid = entry(now - Duration::hours(1));
        let new = entry(now);
        for e in [&old, &mid, &new] {
            store.store(e).await.unwrap();
        }

        let hits = store
            .query_range(now - Duration::hours(1), now, None)
            .await
            .unwrap();
        assert_eq!(hits, vec![new.clone(), mid.clone()]);

        let page = store
            .query_range(now - Duration::hours(3), now, Some(1))
            .await
            .unwrap();
        assert_eq!(page, vec![new]);
        assert_eq!(
            store
                .count_range(now - Duration::hours(3), now)
                .await
                .unwrap(),
            3
        );
    }
}
