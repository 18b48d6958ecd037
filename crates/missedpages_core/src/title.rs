use std::fmt;

use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};

/// Longest page part accepted, in bytes of its database-key form.
pub const MAX_TITLE_BYTES: usize = 255;

const ILLEGAL_CHARACTERS: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Namespace {
    Main,
    Talk,
    User,
    UserTalk,
    Project,
    File,
    MediaWiki,
    Template,
    Help,
    Category,
    Module,
    Special,
}

impl Namespace {
    /// Display-form prefix, empty for the main namespace.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "",
            Self::Talk => "Talk",
            Self::User => "User",
            Self::UserTalk => "User talk",
            Self::Project => "Project",
            Self::File => "File",
            Self::MediaWiki => "MediaWiki",
            Self::Template => "Template",
            Self::Help => "Help",
            Self::Category => "Category",
            Self::Module => "Module",
            Self::Special => "Special",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        let normalized = normalize_spaces(&prefix.replace('_', " "));
        let candidates = [
            ("Talk", Self::Talk),
            ("User", Self::User),
            ("User talk", Self::UserTalk),
            ("Project", Self::Project),
            ("File", Self::File),
            ("Image", Self::File),
            ("MediaWiki", Self::MediaWiki),
            ("Template", Self::Template),
            ("Help", Self::Help),
            ("Category", Self::Category),
            ("Module", Self::Module),
            ("Special", Self::Special),
        ];
        candidates
            .iter()
            .find(|(name, _)| normalized.eq_ignore_ascii_case(name))
            .map(|(_, namespace)| *namespace)
    }
}

/// A page title in canonical form: known namespace prefix, single spaces,
/// first letter of the page part uppercased.
///
/// Ledger rows are keyed by [`CanonicalTitle::db_key`] so that `foo bar`,
/// `Foo_bar` and ` Foo  bar ` all aggregate under `Foo_bar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalTitle {
    namespace: Namespace,
    text: String,
}

impl CanonicalTitle {
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        let spaced = normalize_spaces(&raw.replace('_', " "));
        let spaced = spaced.strip_prefix(':').map(str::trim).unwrap_or(&spaced);
        if spaced.is_empty() {
            return Err(LedgerError::invalid_title(raw, "title is empty"));
        }
        if spaced.starts_with(':') {
            return Err(LedgerError::invalid_title(raw, "title starts with a colon"));
        }
        if let Some(ch) = spaced
            .chars()
            .find(|ch| ILLEGAL_CHARACTERS.contains(ch) || ch.is_control())
        {
            return Err(LedgerError::invalid_title(
                raw,
                format!("title contains illegal character {ch:?}"),
            ));
        }

        let (namespace, body) = match spaced.split_once(':') {
            Some((prefix, rest)) => match Namespace::from_prefix(prefix) {
                Some(namespace) => (namespace, rest.trim()),
                None => (Namespace::Main, spaced),
            },
            None => (Namespace::Main, spaced),
        };

        if namespace == Namespace::Special {
            return Err(LedgerError::invalid_title(
                raw,
                "special pages cannot be logged or redirected",
            ));
        }
        if body.is_empty() {
            return Err(LedgerError::invalid_title(raw, "page name is empty"));
        }
        if is_relative_path(body) {
            return Err(LedgerError::invalid_title(
                raw,
                "relative path segments are not allowed",
            ));
        }
        if body.contains("~~~") {
            return Err(LedgerError::invalid_title(raw, "signature tildes are not allowed"));
        }
        // Case mapping can lengthen the first character, so measure afterwards.
        let text = uppercase_first(body);
        if text.len() > MAX_TITLE_BYTES {
            return Err(LedgerError::invalid_title(
                raw,
                format!("page name exceeds {MAX_TITLE_BYTES} bytes"),
            ));
        }

        Ok(Self { namespace, text })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Page part without the namespace prefix, spaced form.
    pub fn page_text(&self) -> &str {
        &self.text
    }

    /// Prefixed display form, e.g. `User talk:Some page`.
    pub fn text(&self) -> String {
        match self.namespace {
            Namespace::Main => self.text.clone(),
            namespace => format!("{}:{}", namespace.as_str(), self.text),
        }
    }

    /// Prefixed database-key form, e.g. `User_talk:Some_page`.
    pub fn db_key(&self) -> String {
        self.text().replace(' ', "_")
    }
}

impl fmt::Display for CanonicalTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Display form of a stored database key.
pub fn display_from_db_key(db_key: &str) -> String {
    db_key.replace('_', " ")
}

fn is_relative_path(body: &str) -> bool {
    body == "."
        || body == ".."
        || body.starts_with("./")
        || body.starts_with("../")
        || body.contains("/./")
        || body.contains("/../")
        || body.ends_with("/.")
        || body.ends_with("/..")
}

fn uppercase_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        CanonicalTitle::parse(raw).expect("parse").db_key()
    }

    #[test]
    fn spaces_and_underscores_share_one_key() {
        assert_eq!(key("foo bar"), "Foo_bar");
        assert_eq!(key("Foo_bar"), "Foo_bar");
        assert_eq!(key("  Foo   bar "), "Foo_bar");
        assert_eq!(key(":Foo bar"), "Foo_bar");
    }

    #[test]
    fn namespace_prefix_is_canonicalized() {
        assert_eq!(key("category:missing things"), "Category:Missing_things");
        assert_eq!(key("user_talk:someone"), "User_talk:Someone");
        assert_eq!(key("Image:Logo.png"), "File:Logo.png");
        let title = CanonicalTitle::parse("HELP:contents").expect("parse");
        assert_eq!(title.namespace(), Namespace::Help);
        assert_eq!(title.text(), "Help:Contents");
        assert_eq!(title.page_text(), "Contents");
    }

    #[test]
    fn unknown_prefix_stays_in_main_namespace() {
        let title = CanonicalTitle::parse("Day-counts test: part two").expect("parse");
        assert_eq!(title.namespace(), Namespace::Main);
        assert_eq!(title.db_key(), "Day-counts_test:_part_two");
    }

    #[test]
    fn display_form_uses_spaces() {
        let title = CanonicalTitle::parse("Test_target").expect("parse");
        assert_eq!(title.text(), "Test target");
        assert_eq!(title.to_string(), "Test target");
        assert_eq!(display_from_db_key("Category:A_b"), "Category:A b");
    }

    #[test]
    fn rejects_unusable_titles() {
        for raw in [
            "",
            "   ",
            "_",
            "Foo[bar]",
            "A|B",
            "Talk:",
            "Special:Random",
            "../etc",
            "a/../b",
            "Sig ~~~",
        ] {
            let error = CanonicalTitle::parse(raw).expect_err(raw);
            assert!(
                matches!(error, LedgerError::InvalidTitle { .. }),
                "unexpected error for {raw:?}: {error}"
            );
        }
    }

    #[test]
    fn rejects_overlong_titles() {
        let raw = "x".repeat(MAX_TITLE_BYTES + 1);
        assert!(CanonicalTitle::parse(&raw).is_err());
        let raw = "x".repeat(MAX_TITLE_BYTES);
        assert!(CanonicalTitle::parse(&raw).is_ok());
    }

    #[test]
    fn length_limit_applies_after_case_mapping() {
        // U+0149 is two bytes; its uppercase form, U+02BC then N, is three.
        let raw = format!("\u{149}{}", "x".repeat(MAX_TITLE_BYTES - 2));
        assert_eq!(raw.len(), MAX_TITLE_BYTES);
        let error = CanonicalTitle::parse(&raw).expect_err("grows past the limit");
        assert!(matches!(error, LedgerError::InvalidTitle { .. }));

        let raw = format!("\u{149}{}", "x".repeat(MAX_TITLE_BYTES - 3));
        let title = CanonicalTitle::parse(&raw).expect("fits after case mapping");
        assert_eq!(title.page_text().len(), MAX_TITLE_BYTES);
        assert!(title.page_text().starts_with("\u{2bc}N"));
    }

    #[test]
    fn stored_keys_parse_back_to_themselves() {
        let at_limit = "y".repeat(MAX_TITLE_BYTES);
        let grown_at_limit = format!("\u{149}{}", "x".repeat(MAX_TITLE_BYTES - 3));
        let inputs = [
            "foo bar",
            "  spaced   out  ",
            ":Leading colon",
            "category:missing things",
            "user_talk:someone",
            "Image:Logo.png",
            "Day-counts test: part two",
            "Talk : spaced prefix",
            "\u{e9}t\u{e9}",
            "\u{149}apostrophe",
            "\u{df}trasse",
            "Template:\u{149}x",
            at_limit.as_str(),
            grown_at_limit.as_str(),
        ];
        for raw in inputs {
            let stored = key(raw);
            let reparsed = CanonicalTitle::parse(&stored)
                .unwrap_or_else(|error| panic!("stored key {stored:?} from {raw:?}: {error}"));
            assert_eq!(reparsed.db_key(), stored, "input {raw:?}");
        }
    }

    #[test]
    fn rejects_doubled_leading_colon() {
        let error = CanonicalTitle::parse("::Foo").expect_err("must fail");
        assert!(matches!(error, LedgerError::InvalidTitle { .. }));
    }
}
