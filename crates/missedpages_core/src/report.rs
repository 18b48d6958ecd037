//! Read-only projections of the ledger and their plain-text rendering.

use std::fmt::Write as _;

use serde::Serialize;

use crate::error::LedgerResult;
use crate::service::{MissedPages, RecentPage};
use crate::store::{DayCount, TitleCount, format_timestamp};
use crate::title::{CanonicalTitle, display_from_db_key};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
    pub page_title: String,
    pub display_title: String,
    pub count: u64,
    pub day_counts: Vec<u64>,
    /// Sum of `day_counts`; smaller than `count` once the trend window is exceeded.
    pub trend_total: u64,
    pub trend_days: usize,
}

impl LogRow {
    pub fn sparkline(&self) -> String {
        sparkline(&self.day_counts)
    }

    pub fn tooltip(&self) -> String {
        format!(
            "{} misses over {} days",
            group_thousands(self.trend_total),
            group_thousands(u64::try_from(self.trend_days).unwrap_or(u64::MAX))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredRow {
    pub page_title: String,
    pub display_title: String,
    pub count: u64,
}

impl From<TitleCount> for IgnoredRow {
    fn from(entry: TitleCount) -> Self {
        Self {
            display_title: display_from_db_key(&entry.page_title),
            page_title: entry.page_title,
            count: entry.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendReport {
    pub display_title: String,
    pub days: Vec<DayCount>,
    pub total: u64,
}

/// Top missed titles with their recent daily trend.
pub fn log_report(
    service: &MissedPages,
    limit: usize,
    trend_days: usize,
) -> LedgerResult<Vec<LogRow>> {
    service
        .log_entries(limit)?
        .into_iter()
        .map(|entry| {
            let day_counts: Vec<u64> = service
                .store()
                .daily_counts_for_key(&entry.page_title, trend_days)?
                .into_iter()
                .map(|day| day.count)
                .collect();
            Ok(LogRow {
                display_title: display_from_db_key(&entry.page_title),
                trend_total: day_counts.iter().sum(),
                trend_days: day_counts.len(),
                page_title: entry.page_title,
                count: entry.count,
                day_counts,
            })
        })
        .collect()
}

pub fn ignored_report(service: &MissedPages) -> LedgerResult<Vec<IgnoredRow>> {
    Ok(service
        .ignored_entries()?
        .into_iter()
        .map(IgnoredRow::from)
        .collect())
}

pub fn trend_report(
    service: &MissedPages,
    title: &str,
    max_days: usize,
) -> LedgerResult<TrendReport> {
    let title = CanonicalTitle::parse(title)?;
    let days = service.day_series(&title.db_key(), max_days)?;
    Ok(TrendReport {
        display_title: title.text(),
        total: days.iter().map(|day| day.count).sum(),
        days,
    })
}

pub fn render_log(rows: &[LogRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "missed pages: {}", rows.len());
    for row in rows {
        let _ = writeln!(
            out,
            "{}: {} {} ({})",
            row.display_title,
            group_thousands(row.count),
            row.sparkline(),
            row.tooltip()
        );
    }
    out
}

pub fn render_ignored(rows: &[IgnoredRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ignored pages: {}", rows.len());
    for row in rows {
        let _ = writeln!(out, "{}", row.display_title);
    }
    out
}

pub fn render_trend(report: &TrendReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "page: {}", report.display_title);
    let _ = writeln!(out, "days: {}", report.days.len());
    let _ = writeln!(out, "total: {}", group_thousands(report.total));
    for day in &report.days {
        let _ = writeln!(out, "{}: {}", day.day, day.count);
    }
    out
}

pub fn render_recent(page: &RecentPage) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "recent misses: {}", group_thousands(page.total));
    let _ = writeln!(out, "offset: {}", page.offset);
    for record in &page.records {
        let _ = writeln!(
            out,
            "{} {} {}",
            record.id,
            format_timestamp(record.timestamp),
            display_from_db_key(&record.page_title)
        );
    }
    out
}

/// One block character per value, scaled to the largest value.
pub fn sparkline(values: &[u64]) -> String {
    let max = values.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return SPARK_LEVELS[0].to_string().repeat(values.len());
    }
    let top = (SPARK_LEVELS.len() - 1) as u64;
    values
        .iter()
        .map(|value| {
            let level = (value.saturating_mul(top) + max / 2) / max;
            SPARK_LEVELS[level.min(top) as usize]
        })
        .collect()
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::hooks::on_missing_page;
    use crate::service::RecordOutcome;
    use crate::service::tests::service;
    use crate::store::NewMissRecord;

    fn seed_months(service: &MissedPages, raw: &str) {
        let title = CanonicalTitle::parse(raw).expect("title");
        for (month, count) in [(10, 4), (11, 11), (12, 2)] {
            let when = Utc
                .with_ymd_and_hms(2018, month, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp");
            for _ in 0..count {
                service
                    .store()
                    .insert(NewMissRecord::event(&title, when))
                    .expect("insert");
            }
        }
    }

    #[test]
    fn sparkline_scales_to_peak() {
        assert_eq!(sparkline(&[4, 11, 2]), "▄█▂");
        assert_eq!(sparkline(&[0, 0]), "▁▁");
        assert_eq!(sparkline(&[]), "");
        assert_eq!(sparkline(&[5]), "█");
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn log_report_carries_trend_and_tooltip() {
        let service = service();
        seed_months(&service, "Trend page");

        let rows = log_report(&service, 100, 300).expect("report");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.page_title, "Trend_page");
        assert_eq!(row.display_title, "Trend page");
        assert_eq!(row.count, 17);
        assert_eq!(row.day_counts, vec![4, 11, 2]);
        assert_eq!(row.tooltip(), "17 misses over 3 days");

        let narrow = log_report(&service, 100, 1).expect("report");
        assert_eq!(narrow[0].count, 17);
        assert_eq!(narrow[0].day_counts, vec![2]);
        assert_eq!(narrow[0].tooltip(), "2 misses over 1 days");

        let rendered = render_log(&rows);
        assert!(rendered.starts_with("missed pages: 1\n"));
        assert!(rendered.contains("Trend page: 17 ▄█▂ (17 misses over 3 days)"));
    }

    #[test]
    fn log_report_tolerates_keys_that_no_longer_parse() {
        let service = service();
        seed_months(&service, "Trend page");
        let legacy_key = format!("\u{2bc}N{}", "x".repeat(254));
        service
            .store()
            .connection()
            .execute(
                "INSERT INTO missed_pages (mp_datetime, mp_page_title, mp_ignore) VALUES (?1, ?2, 0)",
                ["2019-01-01 00:00:00", legacy_key.as_str()],
            )
            .expect("insert raw row");

        let rows = log_report(&service, 100, 300).expect("report");
        assert_eq!(rows.len(), 2);
        let legacy = rows
            .iter()
            .find(|row| row.page_title == legacy_key)
            .expect("legacy row");
        assert_eq!(legacy.count, 1);
        assert_eq!(legacy.day_counts, vec![1]);
    }

    #[test]
    fn hook_recorded_titles_stay_listable() {
        let mut service = service();
        let grown = format!("\u{149}{}", "x".repeat(253));
        assert_eq!(on_missing_page(&service, &grown), None);
        assert_eq!(
            on_missing_page(&service, &format!("\u{149}{}", "x".repeat(252))),
            Some(RecordOutcome::Recorded)
        );

        let rows = log_report(&service, 100, 300).expect("report");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].page_title.len(), 255);
        assert_eq!(rows[0].day_counts.len(), 1);
        service.ignore(&rows[0].page_title).expect("ignore stored key");
        assert!(log_report(&service, 100, 300).expect("report").is_empty());
    }

    #[test]
    fn tooltip_counts_days() {
        let row = LogRow {
            page_title: "A".to_string(),
            display_title: "A".to_string(),
            count: 1500,
            day_counts: vec![1500],
            trend_total: 1500,
            trend_days: 1,
        };
        assert_eq!(row.tooltip(), "1,500 misses over 1 days");
    }

    #[test]
    fn ignored_report_uses_display_titles() {
        let mut service = service();
        service.ignore("Quiet_page").expect("ignore");
        let rows = ignored_report(&service).expect("report");
        assert_eq!(
            rows,
            vec![IgnoredRow {
                page_title: "Quiet_page".to_string(),
                display_title: "Quiet page".to_string(),
                count: 1,
            }]
        );
        assert_eq!(render_ignored(&rows), "ignored pages: 1\nQuiet page\n");
    }

    #[test]
    fn trend_report_lists_days_oldest_first() {
        let service = service();
        seed_months(&service, "Trend page");
        let report = trend_report(&service, "Trend_page", 300).expect("report");
        assert_eq!(report.total, 17);
        let rendered = render_trend(&report);
        assert_eq!(
            rendered,
            "page: Trend page\ndays: 3\ntotal: 17\n2018-10-01: 4\n2018-11-01: 11\n2018-12-01: 2\n"
        );
    }

    #[test]
    fn recent_listing_is_newest_first() {
        let service = service();
        let title = CanonicalTitle::parse("Recent page").expect("title");
        for day in 1..=3 {
            let when = Utc
                .with_ymd_and_hms(2020, 1, day, 0, 0, 0)
                .single()
                .expect("valid timestamp");
            service
                .store()
                .insert(NewMissRecord::event(&title, when))
                .expect("insert");
        }

        let page = service.recent_misses(2, 0).expect("recent");
        let rendered = render_recent(&page);
        assert_eq!(
            rendered,
            "recent misses: 3\noffset: 0\n3 2020-01-03 00:00:00 Recent page\n2 2020-01-02 00:00:00 Recent page\n"
        );
    }
}
