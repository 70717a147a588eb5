//! Formula tree document as served by a repository remote.
//!
//! Only the fields the server rewrites are typed; everything else is carried
//! through untouched.

use crate::config::RepositoryDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestTree {
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<Formula>,
    /// Realm roles allowed to see the command; absent means everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formula {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    fn visible_to(&self, roles: &BTreeSet<String>) -> bool {
        match self.roles.as_deref() {
            None | Some([]) => true,
            Some(required) => required.iter().any(|role| roles.contains(role)),
        }
    }
}

impl ManifestTree {
    /// Prepare a freshly fetched tree for a caller holding `roles`.
    ///
    /// Drops commands the caller may not see, stamps the repository name on
    /// the rest and points their formula links at the repository's public URL.
    #[must_use]
    pub fn shape(mut self, repo: &RepositoryDescriptor, roles: &BTreeSet<String>) -> Self {
        self.commands.retain(|command| command.visible_to(roles));

        for command in &mut self.commands {
            command.repo = Some(repo.name.clone());
            if let Some(formula) = command.formula.as_mut() {
                formula.repo_url = rewrite_repo_url(
                    formula.repo_url.as_deref(),
                    &repo.server_url,
                    &repo.replace_url,
                );
            }
        }

        self
    }
}

fn rewrite_repo_url(repo_url: Option<&str>, server_url: &str, replace_url: &str) -> Option<String> {
    if let Some(rest) = repo_url.and_then(|url| served_path(url, server_url)) {
        return Some(format!("{replace_url}{rest}"));
    }

    match repo_url {
        Some(url) if !url.is_empty() => Some(url.to_string()),
        _ if replace_url.is_empty() => None,
        _ => Some(replace_url.to_string()),
    }
}

// remainder of `url` after `server_url`, only when it continues on a path,
// query or fragment boundary
fn served_path<'a>(url: &'a str, server_url: &str) -> Option<&'a str> {
    let base = server_url.trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(base)?;
    (rest.is_empty() || rest.starts_with(['/', '?', '#'])).then_some(rest)
}
