//! State transitions for the missed pages ledger.
//!
//! Per title: untracked -> logged (N events) -> ignored -> untracked (via
//! delete), or logged -> untracked (via delete or a successful redirect).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DEFAULT_LOG_LIMIT, DEFAULT_REDIRECT_COMMENT};
use crate::editor::{ContentEditor, RedirectEdit};
use crate::error::LedgerResult;
use crate::store::{DayCount, LedgerStore, MissRecord, NewMissRecord, TitleCount};
use crate::title::CanonicalTitle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The title carries an ignore marker; nothing was written.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectOutcome {
    pub page: String,
    pub target: String,
    pub cleared_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentPage {
    pub total: u64,
    pub offset: usize,
    pub records: Vec<MissRecord>,
}

pub struct MissedPages {
    store: LedgerStore,
    clock: fn() -> DateTime<Utc>,
    redirect_comment: String,
}

impl MissedPages {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            clock: Utc::now,
            redirect_comment: DEFAULT_REDIRECT_COMMENT.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_redirect_comment(mut self, comment: impl Into<String>) -> Self {
        self.redirect_comment = comment.into();
        self
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Log one request for a page that does not exist, unless the title is ignored.
    pub fn record_missing_page(&self, title: &CanonicalTitle) -> LedgerResult<RecordOutcome> {
        if self.store.count_where(title, true)? > 0 {
            debug!(title = %title, "missing page is ignored; not recording");
            return Ok(RecordOutcome::Ignored);
        }
        self.store
            .insert(NewMissRecord::event(title, (self.clock)()))?;
        debug!(title = %title, "recorded missing page");
        Ok(RecordOutcome::Recorded)
    }

    /// Drop every logged miss for the title and stop logging it.
    pub fn ignore(&mut self, title: &str) -> LedgerResult<CanonicalTitle> {
        let title = CanonicalTitle::parse(title)?;
        let now = (self.clock)();
        let removed = self.store.replace_with_ignore_marker(&title, now)?;
        info!(title = %title, removed, "ignoring missing page");
        Ok(title)
    }

    /// Remove all rows for the title, including an ignore marker.
    pub fn delete(&self, title: &str) -> LedgerResult<usize> {
        let title = CanonicalTitle::parse(title)?;
        self.delete_canonical(&title)
    }

    pub fn delete_canonical(&self, title: &CanonicalTitle) -> LedgerResult<usize> {
        let removed = self.store.delete_where(title)?;
        info!(title = %title, removed, "cleared missing page log");
        Ok(removed)
    }

    /// Turn `from` into a redirect to `to` on the wiki, then clear its log.
    ///
    /// Both titles are validated before the wiki is touched. If the edit fails the
    /// ledger is left exactly as it was.
    pub fn redirect<E>(
        &self,
        from: &str,
        to: &str,
        editor: &str,
        content_editor: &mut E,
    ) -> LedgerResult<RedirectOutcome>
    where
        E: ContentEditor + ?Sized,
    {
        let page = CanonicalTitle::parse(from)?;
        let target = CanonicalTitle::parse(to)?;

        content_editor
            .save_redirect(&RedirectEdit {
                page: &page,
                target: &target,
                editor,
                comment: &self.redirect_comment,
            })
            .map_err(|failure| failure.into_ledger_error(&page))?;
        info!(page = %page, target = %target, editor, "created redirect for missing page");

        let cleared_rows = self.delete_canonical(&page)?;
        Ok(RedirectOutcome {
            page: page.text(),
            target: target.text(),
            cleared_rows,
        })
    }

    /// Titles with at least one logged miss, most missed first, capped at `limit`.
    pub fn log_entries(&self, limit: usize) -> LedgerResult<Vec<TitleCount>> {
        self.store.grouped_counts(false, Some(limit))
    }

    pub fn default_log_entries(&self) -> LedgerResult<Vec<TitleCount>> {
        self.log_entries(DEFAULT_LOG_LIMIT)
    }

    pub fn ignored_entries(&self) -> LedgerResult<Vec<TitleCount>> {
        self.store.grouped_counts(true, None)
    }

    /// Misses per day for one title, oldest first, over the last `max_days` active days.
    pub fn day_counts(&self, title: &str, max_days: usize) -> LedgerResult<Vec<u64>> {
        Ok(self
            .day_series(title, max_days)?
            .into_iter()
            .map(|day| day.count)
            .collect())
    }

    /// Same as [`MissedPages::day_counts`] but keeps the calendar day of each count.
    pub fn day_series(&self, title: &str, max_days: usize) -> LedgerResult<Vec<DayCount>> {
        let title = CanonicalTitle::parse(title)?;
        self.store.daily_counts(&title, max_days)
    }

    pub fn recent_misses(&self, limit: usize, offset: usize) -> LedgerResult<RecentPage> {
        Ok(RecentPage {
            total: self.store.count_events()?,
            offset,
            records: self.store.recent_events(limit, offset)?,
        })
    }
}
