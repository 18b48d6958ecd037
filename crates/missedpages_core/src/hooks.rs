use tracing::warn;

use crate::service::{MissedPages, RecordOutcome};
use crate::title::CanonicalTitle;

/// Entry point for the wiki's "page not found" event.
///
/// Failures never reach the reader of the missing page: they are logged and
/// reported as `None`.
pub fn on_missing_page(service: &MissedPages, raw_title: &str) -> Option<RecordOutcome> {
    let title = match CanonicalTitle::parse(raw_title) {
        Ok(title) => title,
        Err(error) => {
            warn!(title = raw_title, %error, "skipping unloggable missing page");
            return None;
        }
    };
    match service.record_missing_page(&title) {
        Ok(outcome) => Some(outcome),
        Err(error) => {
            warn!(title = %title, %error, "failed to record missing page");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::on_missing_page;
    use crate::service::tests::service;
    use crate::service::{MissedPages, RecordOutcome};
    use crate::store::LedgerStore;

    #[test]
    fn hook_records_canonical_title() {
        let service = service();
        assert_eq!(
            on_missing_page(&service, "some_missing page"),
            Some(RecordOutcome::Recorded)
        );
        on_missing_page(&service, "Some missing_page");
        let entries = service.default_log_entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].page_title, "Some_missing_page");
        assert_eq!(entries[0].count, 2);
    }

    #[test]
    fn hook_skips_invalid_titles() {
        let service = service();
        assert_eq!(on_missing_page(&service, "Special:Search"), None);
        assert_eq!(on_missing_page(&service, "A|B"), None);
        assert!(service.default_log_entries().expect("entries").is_empty());
    }

    #[test]
    fn hook_absorbs_storage_failures() {
        // No schema: the table does not exist.
        let service = MissedPages::new(LedgerStore::open_in_memory().expect("open"));
        assert_eq!(on_missing_page(&service, "Anything"), None);
    }
}
