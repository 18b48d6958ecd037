//! Rights gate in front of the mutating ledger operations.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::config::{MissedPagesConfig, RightsSection};
use crate::editor::{ContentEditor, EditFailure};
use crate::error::{LedgerError, LedgerResult};
use crate::service::{MissedPages, RedirectOutcome};
use crate::title::CanonicalTitle;

/// Whoever is asking for an administrative action.
pub trait Actor {
    fn name(&self) -> &str;
    fn has_right(&self, right: &str) -> bool;
}

/// An actor whose identity and rights come from `[actor]` in config.toml.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredActor {
    name: String,
    rights: BTreeSet<String>,
}

impl ConfiguredActor {
    pub fn new<I, S>(name: impl Into<String>, rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            rights: rights
                .into_iter()
                .map(|right| right.as_ref().trim().to_string())
                .filter(|right| !right.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &MissedPagesConfig) -> Self {
        Self::new(config.actor_name(), &config.actor.rights)
    }

    pub fn rights(&self) -> impl Iterator<Item = &str> {
        self.rights.iter().map(String::as_str)
    }
}

impl Actor for ConfiguredActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_right(&self, right: &str) -> bool {
        self.rights.contains(right)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Redirect { from: String, to: String },
    Ignore(String),
    Delete(String),
}

impl AdminAction {
    pub fn required_right<'a>(&self, rights: &'a RightsSection) -> &'a str {
        match self {
            Self::Redirect { .. } => &rights.redirect,
            Self::Ignore(_) => &rights.ignore,
            Self::Delete(_) => &rights.delete,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Redirect { .. } => "redirect a missed page",
            Self::Ignore(_) => "ignore a missed page",
            Self::Delete(_) => "delete a missed page log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminOutcome {
    Redirected(RedirectOutcome),
    Ignored { page: String },
    Deleted { page: String, removed_rows: usize },
}

/// Check `actor` against the configured right for `action`, then run it.
///
/// A missing right fails with [`LedgerError::PermissionDenied`] before the
/// ledger or the wiki is touched. `content_editor` is only needed for redirects.
pub fn perform<A>(
    service: &mut MissedPages,
    rights: &RightsSection,
    actor: &A,
    content_editor: Option<&mut dyn ContentEditor>,
    action: &AdminAction,
) -> LedgerResult<AdminOutcome>
where
    A: Actor + ?Sized,
{
    let right = action.required_right(rights);
    if !actor.has_right(right) {
        return Err(LedgerError::PermissionDenied {
            right: right.to_string(),
            action: action.verb(),
        });
    }
    info!(actor = actor.name(), right, "admin action authorized");

    match action {
        AdminAction::Redirect { from, to } => {
            let Some(content_editor) = content_editor else {
                let page = CanonicalTitle::parse(from)?;
                return Err(EditFailure::Rejected("no content editor is configured".to_string())
                    .into_ledger_error(&page));
            };
            service
                .redirect(from, to, actor.name(), content_editor)
                .map(AdminOutcome::Redirected)
        }
        AdminAction::Ignore(title) => service.ignore(title).map(|page| AdminOutcome::Ignored {
            page: page.text(),
        }),
        AdminAction::Delete(title) => {
            let page = CanonicalTitle::parse(title)?;
            let removed_rows = service.delete_canonical(&page)?;
            Ok(AdminOutcome::Deleted {
                page: page.text(),
                removed_rows,
            })
        }
    }
}
