//! Page cache operations.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CacheStats, CachedPage, PageRow, SourceRef, StatsRow, to_millis};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

/// Cache key for a URL: hex-encoded BLAKE3 digest of the full URL string.
pub fn cache_key(url: &str) -> String {
    blake3::hash(url.as_bytes()).to_hex().to_string()
}

/// Rendered page bodies keyed by URL.
///
/// An entry is valid until the content entity it was rendered from is
/// modified after the entry was stored. Pages not tied to an entity (archives,
/// feeds, the home page) stay valid until the cache is cleared.
#[derive(Debug, Clone)]
pub struct PageCache {
    pool: SqlitePool,
}
impl From<&Database> for PageCache {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl PageCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether a usable entry exists for `url`.
    ///
    /// False when there is no entry, or when `source` is given and was
    /// modified after the entry was stored. Both sides are compared at the
    /// stored millisecond precision.
    pub async fn is_valid(&self, url: &str, source: Option<&SourceRef>) -> Result<bool> {
        let stored_at: Option<i64> = sqlx::query_scalar(include_str!("../queries/get_stored_at.sql"))
            .bind(cache_key(url))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some(stored_at) = stored_at else {
            return Ok(false);
        };
        Ok(match source {
            Some(source) => to_millis(source.modified) <= stored_at,
            None => true,
        })
    }

    /// Read the body stored for `url`.
    pub async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_page(url).await?.map(|page| page.body))
    }

    /// Read the whole entry stored for `url`, metadata included.
    pub async fn get_page(&self, url: &str) -> Result<Option<CachedPage>> {
        let row: Option<PageRow> = sqlx::query_as(include_str!("../queries/get_page.sql"))
            .bind(cache_key(url))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedPage::try_from).transpose()
    }

    /// Store `body` for `url`, replacing any previous entry.
    #[instrument(skip(self, body), fields(body_size = body.len()))]
    pub async fn set(&self, url: &str, body: &[u8], source: Option<&SourceRef>) -> Result<()> {
        self.set_at(url, body, source, UtcDateTime::now()).await
    }

    pub(crate) async fn set_at(
        &self,
        url: &str,
        body: &[u8],
        source: Option<&SourceRef>,
        stored_at: UtcDateTime,
    ) -> Result<()> {
        let entity_id = source
            .map(|s| i64::try_from(s.id))
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("entity id"))?;
        sqlx::query(include_str!("../queries/upsert_page.sql"))
            .bind(cache_key(url))
            .bind(url)
            .bind(body)
            .bind(entity_id)
            .bind(to_millis(stored_at))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Delete every entry, returning how many were removed.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/delete_all.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::info!(deleted = result.rows_affected(), "Cleared page cache");
        Ok(result.rows_affected())
    }

    /// Delete the entry for one URL. Returns `false` if there was none.
    pub async fn delete(&self, url: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_page.sql"))
            .bind(cache_key(url))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every entry rendered from the given content entity.
    pub async fn delete_by_entity(&self, entity_id: u64) -> Result<u64> {
        let entity_id = i64::try_from(entity_id).or_raise(|| ErrorKind::InvalidData("entity id"))?;
        let result = sqlx::query(include_str!("../queries/delete_by_entity.sql"))
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let row: StatsRow = sqlx::query_as(include_str!("../queries/stats.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::Duration;
    use time::macros::utc_datetime;

    const URL: &str = "https://example.com/hello-world/";

    async fn cache() -> PageCache {
        PageCache::from(&Database::connect_in_memory().await.unwrap())
    }

    #[rstest]
    #[case("https://example.com/")]
    #[case("https://example.com/?p=1")]
    #[case("")]
    fn test_cache_key_is_stable_hex(#[case] url: &str) {
        let key = cache_key(url);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key(url));
    }

    #[test]
    fn test_cache_key_distinguishes_trailing_slash() {
        assert_ne!(cache_key("https://example.com/a"), cache_key("https://example.com/a/"));
    }

    #[tokio::test]
    async fn test_missing_entry_is_invalid() {
        let cache = cache().await;
        assert!(!cache.is_valid(URL, None).await.unwrap());
        assert_eq!(cache.get(URL).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache().await;
        let source = SourceRef { id: 7, modified: UtcDateTime::now() - Duration::hours(1) };
        cache.set(URL, b"<html>one</html>", Some(&source)).await.unwrap();
        assert!(cache.is_valid(URL, Some(&source)).await.unwrap());
        let page = cache.get_page(URL).await.unwrap().unwrap();
        assert_eq!(page.body, b"<html>one</html>");
        assert_eq!(page.entity_id, Some(7));
        assert_eq!(page.url, URL);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = cache().await;
        cache.set(URL, b"one", None).await.unwrap();
        cache.set(URL, b"two", None).await.unwrap();
        assert_eq!(cache.get(URL).await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_modification_after_store_invalidates() {
        let cache = cache().await;
        let stored_at = UtcDateTime::now() - Duration::minutes(10);
        let mut source = SourceRef { id: 3, modified: stored_at - Duration::minutes(5) };
        cache.set_at(URL, b"body", Some(&source), stored_at).await.unwrap();
        assert!(cache.is_valid(URL, Some(&source)).await.unwrap());
        // Same instant is still valid: stored_at >= modified.
        source.modified = stored_at;
        assert!(cache.is_valid(URL, Some(&source)).await.unwrap());
        // Any edit after the store must invalidate, and stays invalid.
        source.modified = stored_at + Duration::milliseconds(1);
        assert!(!cache.is_valid(URL, Some(&source)).await.unwrap());
        source.modified = stored_at + Duration::minutes(5);
        assert!(!cache.is_valid(URL, Some(&source)).await.unwrap());
        // A fresh store revalidates it.
        cache.set(URL, b"fresh", Some(&source)).await.unwrap();
        assert!(cache.is_valid(URL, Some(&source)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sub_millisecond_source_time_matches_its_store() {
        let cache = cache().await;
        let stored_at = utc_datetime!(2025-03-14 15:09:26.535_897_932);
        let source = SourceRef { id: 3, modified: stored_at };
        cache.set_at(URL, b"body", Some(&source), stored_at).await.unwrap();
        assert!(cache.is_valid(URL, Some(&source)).await.unwrap());
        let later = SourceRef { id: 3, modified: utc_datetime!(2025-03-14 15:09:26.536) };
        assert!(!cache.is_valid(URL, Some(&later)).await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_without_source_stays_valid() {
        let cache = cache().await;
        cache.set_at(URL, b"body", None, UtcDateTime::now() - Duration::days(365)).await.unwrap();
        assert!(cache.is_valid(URL, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all_counts() {
        let cache = cache().await;
        cache.set("https://example.com/a/", b"a", None).await.unwrap();
        cache.set("https://example.com/b/", b"bb", None).await.unwrap();
        assert_eq!(cache.stats().await.unwrap(), CacheStats { entries: 2, total_bytes: 3 });
        assert_eq!(cache.clear_all().await.unwrap(), 2);
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
        assert_eq!(cache.clear_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_delete_by_entity() {
        let cache = cache().await;
        let source = SourceRef { id: 42, modified: UtcDateTime::now() };
        cache.set("https://example.com/post/", b"a", Some(&source)).await.unwrap();
        cache.set("https://example.com/post/amp/", b"b", Some(&source)).await.unwrap();
        cache.set("https://example.com/", b"c", None).await.unwrap();
        assert!(cache.delete("https://example.com/").await.unwrap());
        assert!(!cache.delete("https://example.com/").await.unwrap());
        assert_eq!(cache.delete_by_entity(42).await.unwrap(), 2);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }
}
