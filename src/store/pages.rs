use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::RawPage;

/// Contract of the raw document store: append-only bulk inserts and
/// cursor-paged reads ordered by id ascending. Ids are opaque strings whose
/// lexicographic order matches insertion order.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Append a batch of raw pages, returning their assigned ids in order
    async fn insert_batch(&self, pages: Vec<RawPage>) -> Result<Vec<String>>;

    /// Read up to `limit` pages with id strictly greater than `after`
    /// (all pages when `None`), optionally restricted to unindexed ones,
    /// ordered by id ascending.
    async fn fetch_batch(
        &self,
        after: Option<&str>,
        limit: usize,
        unindexed_only: bool,
    ) -> Result<Vec<RawPage>>;

    /// Flip the indexed flag on the given pages
    async fn mark_indexed(&self, ids: &[String]) -> Result<()>;

    /// Total number of stored pages
    async fn count(&self) -> Result<usize>;
}

/// In-memory page store. Ids are zero-padded hex counters so that the
/// lexicographic cursor ordering of the contract holds.
pub struct MemoryPageStore {
    state: Mutex<MemoryPages>,
}

#[derive(Default)]
struct MemoryPages {
    pages: Vec<RawPage>,
    next_id: u64,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryPages::default()),
        }
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn insert_batch(&self, pages: Vec<RawPage>) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(pages.len());
        for mut page in pages {
            state.next_id += 1;
            page.id = format!("{:024x}", state.next_id);
            if page.created_at.is_none() {
                page.created_at = Some(now);
            }
            page.updated_at = Some(now);
            ids.push(page.id.clone());
            state.pages.push(page);
        }
        Ok(ids)
    }

    async fn fetch_batch(
        &self,
        after: Option<&str>,
        limit: usize,
        unindexed_only: bool,
    ) -> Result<Vec<RawPage>> {
        let state = self.state.lock();
        Ok(state
            .pages
            .iter()
            .filter(|p| after.map_or(true, |a| p.id.as_str() > a))
            .filter(|p| !unindexed_only || !p.indexed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_indexed(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        for page in state.pages.iter_mut() {
            if ids.contains(&page.id) {
                page.indexed = true;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.lock().pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str) -> RawPage {
        RawPage {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ordered_ids() {
        let store = MemoryPageStore::new();
        let ids = store
            .insert_batch(vec![page("https://a.test/"), page("https://b.test/")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
    }

    #[tokio::test]
    async fn test_cursor_pagination() {
        let store = MemoryPageStore::new();
        let ids = store
            .insert_batch((0..5).map(|i| page(&format!("https://s{}.test/", i))).collect())
            .await
            .unwrap();

        let first = store.fetch_batch(None, 2, false).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = store
            .fetch_batch(Some(&first[1].id), 10, false)
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].id, ids[2]);
    }

    #[tokio::test]
    async fn test_mark_indexed_filters_unindexed_reads() {
        let store = MemoryPageStore::new();
        let ids = store
            .insert_batch(vec![page("https://a.test/"), page("https://b.test/")])
            .await
            .unwrap();
        store.mark_indexed(&ids[..1]).await.unwrap();

        let remaining = store.fetch_batch(None, 10, true).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[1]);
    }
}
