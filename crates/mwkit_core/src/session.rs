use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::client::{EditRequest, WikiWriteApi};
use crate::report::ChangeSummary;
use crate::site::TitlePatternResolver;
use crate::wikitext::Wikitext;

/// MediaWiki truncates longer edit summaries.
pub const MAX_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    pub summary: Option<String>,
    pub dry_run: bool,
    pub minor: bool,
    pub bot: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditAction {
    Unchanged,
    WouldCreate,
    WouldUpdate,
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub title: String,
    pub action: EditAction,
    pub summary: Option<String>,
    pub changes: ChangeSummary,
    pub revision_id: Option<i64>,
    pub request_count: usize,
}

/// Load `title`, let `transform` edit its wikitext, and save the result when
/// something changed. A page that does not exist yet starts out empty.
pub fn run_edit_session<A, S, F>(
    api: &mut A,
    site: &S,
    title: &str,
    options: &EditOptions,
    transform: F,
) -> Result<EditOutcome>
where
    A: WikiWriteApi,
    S: TitlePatternResolver,
    F: FnOnce(&mut Wikitext<'_, S>) -> Result<()>,
{
    let page = api
        .get_page(title)
        .with_context(|| format!("failed to load {title}"))?;
    let exists = page.is_some();
    let (original, base_timestamp) = match page {
        Some(page) => (page.content, Some(page.timestamp)),
        None => (String::new(), None),
    };

    let mut doc = Wikitext::new(site, original.as_str());
    transform(&mut doc).with_context(|| format!("failed to transform {title}"))?;
    let changes = doc.change_summary();

    if !doc.is_changed() || doc.text() == original {
        return Ok(EditOutcome {
            title: title.to_string(),
            action: EditAction::Unchanged,
            summary: None,
            changes,
            revision_id: None,
            request_count: api.request_count(),
        });
    }

    let summary = options
        .summary
        .clone()
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or_else(|| default_summary(&doc));

    if options.dry_run {
        return Ok(EditOutcome {
            title: title.to_string(),
            action: if exists {
                EditAction::WouldUpdate
            } else {
                EditAction::WouldCreate
            },
            summary: Some(summary),
            changes,
            revision_id: None,
            request_count: api.request_count(),
        });
    }

    let request = EditRequest {
        title: title.to_string(),
        text: doc.text().to_string(),
        summary: summary.clone(),
        base_timestamp,
        minor: options.minor,
        bot: options.bot,
        no_create: exists,
        create_only: !exists,
    };
    let result = api
        .edit_page(&request)
        .with_context(|| format!("failed to save {title}"))?;

    let action = if result.no_change {
        EditAction::Unchanged
    } else if exists {
        EditAction::Updated
    } else {
        EditAction::Created
    };
    info!(
        "{title}: {action:?} ({} substitutions, revision {})",
        changes.substitution_count,
        result
            .new_revision_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    Ok(EditOutcome {
        title: title.to_string(),
        action,
        summary: Some(summary),
        changes,
        revision_id: result.new_revision_id,
        request_count: api.request_count(),
    })
}

fn default_summary<S: TitlePatternResolver>(doc: &Wikitext<'_, S>) -> String {
    let report = doc.edit_summary(MAX_SUMMARY_CHARS);
    if !report.is_empty() {
        return report;
    }
    let added = format!("{}{}", doc.prepended(), doc.appended());
    let added = added.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut summary = format!("+ {added}");
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        summary = summary.chars().take(MAX_SUMMARY_CHARS - 1).collect();
        summary.push('…');
    }
    summary
}
