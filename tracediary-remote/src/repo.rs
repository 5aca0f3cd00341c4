//! Repository coordinates and user input parsing.

use crate::error::{StoreError, StoreResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> StoreResult<Self> {
        let owner = owner.into().trim().to_string();
        let repo = strip_git_suffix(repo.into().trim()).to_string();
        validate_segment("owner", &owner)?;
        validate_segment("repo", &repo)?;
        Ok(Self { owner, repo })
    }

    /// `owner/repo`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Canonical web URL, e.g. `https://gitee.com/owner/repo`.
    pub fn web_url(&self, host: &str) -> String {
        format!("https://{host}/{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

fn strip_git_suffix(name: &str) -> &str {
    if name.len() > 4 && name[name.len() - 4..].eq_ignore_ascii_case(".git") {
        &name[..name.len() - 4]
    } else {
        name
    }
}

fn validate_segment(label: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidRepo(format!("{label} is missing")));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if !value.chars().all(allowed) {
        return Err(StoreError::InvalidRepo(format!(
            "{label} contains unsupported characters"
        )));
    }
    Ok(())
}

/// Parses `https://{host}/{owner}/{repo}[.git]` or the `owner/repo` shorthand.
///
/// `host` is the accepted web host; its `www.` form is accepted too.
pub fn parse_repo_input(input: &str, host: &str) -> StoreResult<RepoRef> {
    let input = input.trim();
    if input.is_empty() {
        return Err(StoreError::InvalidRepo("repository address is empty".into()));
    }

    if !input.contains("://") {
        let parts: Vec<&str> = input.trim_matches('/').split('/').collect();
        return match parts.as_slice() {
            [owner, repo] => RepoRef::new(*owner, *repo),
            _ => Err(StoreError::InvalidRepo(
                "expected owner/repo or a repository URL".into(),
            )),
        };
    }

    let url = Url::parse(input)
        .map_err(|_| StoreError::InvalidRepo(format!("use https://{host}/{{owner}}/{{repo}}")))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(StoreError::InvalidRepo("unsupported URL scheme".into()));
    }
    let actual_host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if actual_host != host && actual_host != format!("www.{host}") {
        return Err(StoreError::InvalidRepo(format!("repository must be on {host}")));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [owner, repo] => RepoRef::new(*owner, *repo),
        [] | [_] => Err(StoreError::InvalidRepo(
            "address must include owner/repo".into(),
        )),
        _ => Err(StoreError::InvalidRepo(
            "use the repository root address without extra path".into(),
        )),
    }
}
