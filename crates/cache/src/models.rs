use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// The content entity a page was rendered from.
///
/// Only the identifier and last modification time matter to the cache; the
/// enumerator builds one of these per entity URL so that validation never
/// needs a reverse lookup against the content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRef {
    pub id: u64,
    pub modified: UtcDateTime,
}

/// A page body read back from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub url: String,
    pub body: Vec<u8>,
    pub entity_id: Option<u64>,
    pub stored_at: UtcDateTime,
}

/// Aggregate numbers for `stillpress cache stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PageRow {
    #[allow(dead_code)]
    pub(crate) key: String,
    pub(crate) url: String,
    pub(crate) body: Vec<u8>,
    pub(crate) entity_id: Option<i64>,
    pub(crate) stored_at: i64,
}
impl TryFrom<PageRow> for CachedPage {
    type Error = Error;
    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            url: row.url,
            body: row.body,
            entity_id: row
                .entity_id
                .map(u64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("entity id"))?,
            stored_at: from_millis(row.stored_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    pub(crate) entries: i64,
    pub(crate) total_bytes: i64,
}
impl From<StatsRow> for CacheStats {
    fn from(row: StatsRow) -> Self {
        Self {
            entries: u64::try_from(row.entries).unwrap_or_default(),
            total_bytes: u64::try_from(row.total_bytes).unwrap_or_default(),
        }
    }
}

/// Timestamps are stored as Unix milliseconds; whole seconds would make an
/// edit made in the same second as the fetch indistinguishable from it.
pub(crate) fn to_millis(at: UtcDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

pub(crate) fn from_millis(millis: i64) -> Result<UtcDateTime, Error> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .or_raise(|| ErrorKind::InvalidData("stored timestamp"))
}
