//! GitHub webhook payload mapping.
//!
//! Translates raw `pull_request` webhook payloads into [`SettlementEvent`]s.
//! Only terminal PR outcomes are interesting: `closed` with `merged == true`
//! maps to [`SettlementEventKind::PrMerged`], `closed` without a merge maps
//! to [`SettlementEventKind::PrClosedUnmerged`]. Everything else (opened,
//! synchronize, labeled, ...) maps to `None`.
//!
//! The job id is taken from a `Closes #N` / `Fixes #N` style reference in
//! the PR body, falling back to the head branch when it encodes an issue
//! number (`issue-42-...`). Payloads that close a PR without referencing any
//! known job shape are reported as errors so the caller can log them.

use crate::types::{ContributorId, JobId};
use crate::watcher::{SettlementEvent, SettlementEventKind};
use anyhow::{bail, Context, Result};
use serde_json::Value;

const CLOSING_KEYWORDS: [&str; 6] = ["close", "closes", "closed", "fix", "fixes", "resolves"];

/// Map a GitHub `pull_request` webhook payload to a settlement event.
///
/// `repo_slug` is the `owner/name` of the repository the marketplace tracks;
/// payloads for other repositories are rejected.
pub fn map_webhook(repo_slug: &str, payload: &Value) -> Result<Option<SettlementEvent>> {
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .context("payload has no action field")?;

    // Only a closed PR can settle or cancel a contract
    if action != "closed" {
        return Ok(None);
    }

    let full_name = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .context("payload has no repository.full_name")?;
    if full_name != repo_slug {
        bail!("payload is for repository {full_name}, expected {repo_slug}");
    }

    let pr = payload
        .get("pull_request")
        .context("payload has no pull_request object")?;

    let number = pr
        .get("number")
        .and_then(Value::as_u64)
        .context("pull_request has no number")?;
    let merged = pr.get("merged").and_then(Value::as_bool).unwrap_or(false);
    let login = pr
        .pointer("/user/login")
        .and_then(Value::as_str)
        .context("pull_request has no user.login")?;

    let body = pr.get("body").and_then(Value::as_str).unwrap_or_default();
    let head_ref = pr
        .pointer("/head/ref")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let issue = issue_from_body(body)
        .or_else(|| issue_from_branch(head_ref))
        .with_context(|| format!("pull request #{number} references no issue"))?;

    // Repository-scoped issue reference is the job id
    let repo_name = repo_slug.rsplit('/').next().unwrap_or(repo_slug);
    let job_id = JobId::new(format!("{repo_name}#{issue}"));

    Ok(Some(SettlementEvent {
        kind: if merged {
            SettlementEventKind::PrMerged
        } else {
            SettlementEventKind::PrClosedUnmerged
        },
        job_id,
        contributor_id: ContributorId::new(login),
        pr_reference: format!("#{number}"),
    }))
}

/// First `<keyword> #N` reference in the PR body.
fn issue_from_body(body: &str) -> Option<u64> {
    let mut words = body.split_whitespace().peekable();
    while let Some(word) = words.next() {
        let keyword = word.trim_end_matches(':').to_ascii_lowercase();
        if !CLOSING_KEYWORDS.contains(&keyword.as_str()) {
            continue;
        }
        if let Some(next) = words.peek() {
            if let Some(number) = parse_issue_ref(next) {
                return Some(number);
            }
        }
    }
    None
}

/// Issue number from a branch named like `issue-42-fix-parser`.
fn issue_from_branch(head_ref: &str) -> Option<u64> {
    let rest = head_ref.strip_prefix("issue-")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_issue_ref(word: &str) -> Option<u64> {
    let trimmed = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '#');
    trimmed.strip_prefix('#')?.parse().ok()
}
