//! SQLite persistence for the missed pages ledger.
//!
//! One table, `missed_pages`, holds both miss events (`mp_ignore = 0`) and ignore
//! markers (`mp_ignore = 1`). Every mutation is an insert or a bulk delete keyed by
//! the canonical title; nothing is updated in place.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior, params};
use serde::Serialize;

use crate::error::{LedgerResult, StorageContext};
use crate::title::CanonicalTitle;

pub const TABLE_NAME: &str = "missed_pages";

/// Stored timestamp layout; SQLite's `date()` understands it directly.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub page_title: String,
    pub ignored: bool,
}

/// A row about to be written; the store assigns the id.
#[derive(Debug, Clone, Copy)]
pub struct NewMissRecord<'a> {
    pub page_title: &'a CanonicalTitle,
    pub timestamp: DateTime<Utc>,
    pub ignored: bool,
}

impl<'a> NewMissRecord<'a> {
    pub fn event(page_title: &'a CanonicalTitle, timestamp: DateTime<Utc>) -> Self {
        Self {
            page_title,
            timestamp,
            ignored: false,
        }
    }

    pub fn ignore_marker(page_title: &'a CanonicalTitle, timestamp: DateTime<Utc>) -> Self {
        Self {
            page_title,
            timestamp,
            ignored: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleCount {
    pub page_title: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: u64,
}

pub struct LedgerStore {
    connection: Connection,
}

impl LedgerStore {
    /// Wrap an already-open connection. The schema is not touched; run
    /// [`crate::schema::ensure_schema`] once at startup.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn open(db_path: &Path) -> LedgerResult<Self> {
        let connection = Connection::open(db_path)
            .storage_context(&format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .storage_context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .storage_context("failed to enable WAL journal mode")?;
        Ok(Self::new(connection))
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        let connection =
            Connection::open_in_memory().storage_context("failed to open in-memory database")?;
        Ok(Self::new(connection))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn insert(&self, record: NewMissRecord<'_>) -> LedgerResult<i64> {
        insert_record(&self.connection, record)?;
        Ok(self.connection.last_insert_rowid())
    }

    pub fn count_where(&self, page_title: &CanonicalTitle, ignored: bool) -> LedgerResult<u64> {
        let count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM missed_pages WHERE mp_page_title = ?1 AND mp_ignore = ?2",
                params![page_title.db_key(), ignored],
                |row| row.get(0),
            )
            .storage_context("failed to count missed page rows")?;
        Ok(count_from_sql(count))
    }

    /// Remove every row for the title. Returns the number of rows removed.
    pub fn delete_where(&self, page_title: &CanonicalTitle) -> LedgerResult<usize> {
        delete_title_rows(&self.connection, page_title)
    }

    /// Delete all rows for the title and insert one ignore marker, as a single
    /// IMMEDIATE transaction so concurrent writers queue behind it.
    pub fn replace_with_ignore_marker(
        &mut self,
        page_title: &CanonicalTitle,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage_context("failed to start ignore transaction")?;
        let removed = delete_title_rows(&transaction, page_title)?;
        insert_record(
            &transaction,
            NewMissRecord::ignore_marker(page_title, timestamp),
        )?;
        transaction
            .commit()
            .storage_context("failed to commit ignore transaction")?;
        Ok(removed)
    }

    /// Per-title row counts, most frequent first, ties broken by title.
    /// `limit = None` is unbounded.
    pub fn grouped_counts(
        &self,
        ignored: bool,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<TitleCount>> {
        let limit = limit.map_or(-1, sql_limit);
        let mut statement = self
            .connection
            .prepare(
                "SELECT mp_page_title, COUNT(mp_id) AS count
                 FROM missed_pages
                 WHERE mp_ignore = ?1
                 GROUP BY mp_page_title
                 ORDER BY count DESC, mp_page_title ASC
                 LIMIT ?2",
            )
            .storage_context("failed to prepare grouped counts query")?;
        let rows = statement
            .query_map(params![ignored, limit], |row| {
                Ok(TitleCount {
                    page_title: row.get(0)?,
                    count: count_from_sql(row.get(1)?),
                })
            })
            .storage_context("failed to run grouped counts query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .storage_context("failed to read grouped counts row")
    }

    /// Event counts per calendar day for one title, oldest first, limited to the
    /// most recent `max_days` days that had at least one event.
    pub fn daily_counts(
        &self,
        page_title: &CanonicalTitle,
        max_days: usize,
    ) -> LedgerResult<Vec<DayCount>> {
        self.daily_counts_for_key(&page_title.db_key(), max_days)
    }

    /// [`LedgerStore::daily_counts`] keyed by a stored `mp_page_title` value as-is.
    pub fn daily_counts_for_key(
        &self,
        db_key: &str,
        max_days: usize,
    ) -> LedgerResult<Vec<DayCount>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT day, count FROM (
                    SELECT date(mp_datetime) AS day, COUNT(mp_id) AS count
                    FROM missed_pages
                    WHERE mp_page_title = ?1 AND mp_ignore = 0
                    GROUP BY day
                    ORDER BY day DESC
                    LIMIT ?2
                 )
                 ORDER BY day ASC",
            )
            .storage_context("failed to prepare daily counts query")?;
        let rows = statement
            .query_map(params![db_key, sql_limit(max_days)], |row| {
                let day: String = row.get(0)?;
                let day = NaiveDate::parse_from_str(&day, DAY_FORMAT).map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
                })?;
                Ok(DayCount {
                    day,
                    count: count_from_sql(row.get(1)?),
                })
            })
            .storage_context("failed to run daily counts query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .storage_context("failed to read daily counts row")
    }

    /// Individual miss events, newest first, for a paged "recent" listing.
    pub fn recent_events(&self, limit: usize, offset: usize) -> LedgerResult<Vec<MissRecord>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT mp_id, mp_datetime, mp_page_title, mp_ignore
                 FROM missed_pages
                 WHERE mp_ignore = 0
                 ORDER BY mp_datetime DESC, mp_id DESC
                 LIMIT ?1 OFFSET ?2",
            )
            .storage_context("failed to prepare recent events query")?;
        let rows = statement
            .query_map(params![sql_limit(limit), sql_limit(offset)], miss_record_from_row)
            .storage_context("failed to run recent events query")?;
        rows.collect::<Result<Vec<_>, _>>()
            .storage_context("failed to read recent events row")
    }

    pub fn count_events(&self) -> LedgerResult<u64> {
        let count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM missed_pages WHERE mp_ignore = 0",
                [],
                |row| row.get(0),
            )
            .storage_context("failed to count miss events")?;
        Ok(count_from_sql(count))
    }
}

fn insert_record(connection: &Connection, record: NewMissRecord<'_>) -> LedgerResult<()> {
    connection
        .execute(
            "INSERT INTO missed_pages (mp_datetime, mp_page_title, mp_ignore) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(record.timestamp),
                record.page_title.db_key(),
                record.ignored,
            ],
        )
        .storage_context("failed to insert missed page row")?;
    Ok(())
}

fn delete_title_rows(connection: &Connection, page_title: &CanonicalTitle) -> LedgerResult<usize> {
    connection
        .execute(
            "DELETE FROM missed_pages WHERE mp_page_title = ?1",
            [page_title.db_key()],
        )
        .storage_context("failed to delete missed page rows")
}

fn miss_record_from_row(row: &Row<'_>) -> rusqlite::Result<MissRecord> {
    let raw_timestamp: String = row.get(1)?;
    let timestamp = parse_timestamp(&raw_timestamp)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error)))?;
    Ok(MissRecord {
        id: row.get(0)?,
        timestamp,
        page_title: row.get(2)?,
        ignored: row.get(3)?,
    })
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}

fn sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{DayCount, LedgerStore, NewMissRecord, TitleCount};
    use crate::error::LedgerError;
    use crate::schema::ensure_schema;
    use crate::title::CanonicalTitle;

    fn store() -> LedgerStore {
        let store = LedgerStore::open_in_memory().expect("open store");
        ensure_schema(store.connection()).expect("schema");
        store
    }

    fn title(raw: &str) -> CanonicalTitle {
        CanonicalTitle::parse(raw).expect("title")
    }

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn insert_events(store: &LedgerStore, page: &CanonicalTitle, when: DateTime<Utc>, n: usize) {
        for _ in 0..n {
            store
                .insert(NewMissRecord::event(page, when))
                .expect("insert event");
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = store();
        let page = title("Alpha");
        let first = store
            .insert(NewMissRecord::event(&page, at(2024, 1, 1, 0)))
            .expect("insert");
        let second = store
            .insert(NewMissRecord::event(&page, at(2024, 1, 1, 0)))
            .expect("insert");
        assert!(second > first);
        assert_eq!(store.count_where(&page, false).expect("count"), 2);
        assert_eq!(store.count_where(&page, true).expect("count"), 0);
    }

    #[test]
    fn delete_where_removes_events_and_markers() {
        let store = store();
        let page = title("Alpha");
        let other = title("Beta");
        insert_events(&store, &page, at(2024, 1, 1, 0), 3);
        insert_events(&store, &other, at(2024, 1, 1, 0), 1);
        store
            .insert(NewMissRecord::ignore_marker(&page, at(2024, 1, 2, 0)))
            .expect("insert marker");

        assert_eq!(store.delete_where(&page).expect("delete"), 4);
        assert_eq!(store.delete_where(&page).expect("delete again"), 0);
        assert_eq!(store.count_where(&other, false).expect("count"), 1);
    }

    #[test]
    fn ignore_marker_replaces_prior_rows() {
        let mut store = store();
        let page = title("Alpha");
        insert_events(&store, &page, at(2024, 1, 1, 0), 5);

        let removed = store
            .replace_with_ignore_marker(&page, at(2024, 2, 1, 0))
            .expect("ignore");
        assert_eq!(removed, 5);
        store
            .replace_with_ignore_marker(&page, at(2024, 2, 2, 0))
            .expect("ignore twice");
        assert_eq!(store.count_where(&page, true).expect("count"), 1);
        assert_eq!(store.count_where(&page, false).expect("count"), 0);
    }

    #[test]
    fn grouped_counts_orders_by_count_then_title() {
        let store = store();
        insert_events(&store, &title("Zeta"), at(2024, 1, 1, 0), 2);
        insert_events(&store, &title("Alpha"), at(2024, 1, 1, 0), 2);
        insert_events(&store, &title("Mid"), at(2024, 1, 1, 0), 5);
        store
            .insert(NewMissRecord::ignore_marker(&title("Hidden"), at(2024, 1, 1, 0)))
            .expect("marker");

        let all = store.grouped_counts(false, None).expect("grouped");
        assert_eq!(
            all,
            vec![
                TitleCount {
                    page_title: "Mid".to_string(),
                    count: 5
                },
                TitleCount {
                    page_title: "Alpha".to_string(),
                    count: 2
                },
                TitleCount {
                    page_title: "Zeta".to_string(),
                    count: 2
                },
            ]
        );

        let capped = store.grouped_counts(false, Some(2)).expect("grouped");
        assert_eq!(capped.len(), 2);
        assert!(store.grouped_counts(false, Some(0)).expect("grouped").is_empty());

        let ignored = store.grouped_counts(true, None).expect("ignored");
        assert_eq!(ignored.len(), 1);
        assert_eq!(ignored[0].page_title, "Hidden");
    }

    #[test]
    fn daily_counts_group_by_calendar_day() {
        let store = store();
        let page = title("Day-counts test");
        insert_events(&store, &page, at(2018, 10, 1, 12), 4);
        insert_events(&store, &page, at(2018, 11, 1, 12), 11);
        insert_events(&store, &page, at(2018, 12, 1, 1), 1);
        insert_events(&store, &page, at(2018, 12, 1, 23), 1);
        insert_events(&store, &title("Other"), at(2018, 11, 1, 12), 7);

        let counts = store.daily_counts(&page, 300).expect("daily");
        assert_eq!(
            counts.iter().map(|day| day.count).collect::<Vec<_>>(),
            vec![4, 11, 2]
        );
        assert_eq!(
            counts[0],
            DayCount {
                day: chrono::NaiveDate::from_ymd_opt(2018, 10, 1).expect("date"),
                count: 4
            }
        );
    }

    #[test]
    fn daily_counts_keep_most_recent_days() {
        let store = store();
        let page = title("Alpha");
        insert_events(&store, &page, at(2024, 3, 1, 0), 1);
        insert_events(&store, &page, at(2024, 3, 2, 0), 2);
        insert_events(&store, &page, at(2024, 3, 3, 0), 3);

        let counts = store.daily_counts(&page, 2).expect("daily");
        assert_eq!(
            counts.iter().map(|day| day.count).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(store.daily_counts(&page, 0).expect("daily").is_empty());
    }

    #[test]
    fn daily_counts_skip_ignore_markers() {
        let store = store();
        let page = title("Alpha");
        store
            .insert(NewMissRecord::ignore_marker(&page, at(2024, 1, 1, 0)))
            .expect("marker");
        assert!(store.daily_counts(&page, 300).expect("daily").is_empty());
    }

    #[test]
    fn recent_events_page_newest_first() {
        let store = store();
        insert_events(&store, &title("Old"), at(2024, 1, 1, 0), 1);
        insert_events(&store, &title("New"), at(2024, 1, 3, 0), 1);
        insert_events(&store, &title("Middle"), at(2024, 1, 2, 0), 1);
        store
            .insert(NewMissRecord::ignore_marker(&title("Hidden"), at(2024, 1, 4, 0)))
            .expect("marker");

        assert_eq!(store.count_events().expect("count"), 3);
        let first_page = store.recent_events(2, 0).expect("recent");
        assert_eq!(
            first_page
                .iter()
                .map(|record| record.page_title.as_str())
                .collect::<Vec<_>>(),
            vec!["New", "Middle"]
        );
        assert_eq!(first_page[0].timestamp, at(2024, 1, 3, 0));
        assert!(!first_page[0].ignored);

        let second_page = store.recent_events(2, 2).expect("recent");
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].page_title, "Old");
    }

    #[test]
    fn queries_without_schema_report_storage_unavailable() {
        let store = LedgerStore::open_in_memory().expect("open store");
        let error = store.count_events().expect_err("must fail");
        assert!(matches!(error, LedgerError::StorageUnavailable { .. }));
    }

    #[test]
    fn file_store_persists_across_connections() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("ledger.db");
        {
            let store = LedgerStore::open(&db_path).expect("open");
            ensure_schema(store.connection()).expect("schema");
            insert_events(&store, &title("Alpha"), at(2024, 1, 1, 0), 2);
        }
        let store = LedgerStore::open(&db_path).expect("reopen");
        assert_eq!(store.count_where(&title("alpha"), false).expect("count"), 2);
    }
}
