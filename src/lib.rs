//! # Ritchie (Formula Repository Tree Server)
//!
//! `ritchie` serves per-organization formula repository trees: JSON manifests
//! describing the CLI formulas a tenant can install.
//!
//! ## Request Resolution
//!
//! Every `GET /tree` request goes through the same two stages:
//!
//! 1. **Repository lookup:** the `x-org` header selects the organization and
//!    `x-repo-name` selects one of its repositories. When a name is declared
//!    twice the lowest `priority` wins.
//! 2. **Authorization:** the request path and method are checked against the
//!    process-wide security constraints. Public permit rules short-circuit the
//!    check; otherwise the caller's realm roles are fetched from the identity
//!    provider and matched against the deny rules.
//!
//! Only then is the manifest fetched from the repository's remote, its links
//! rewritten and its role-restricted commands filtered for the caller.
//!
//! ## Configuration
//!
//! Organizations, repositories, identity realms and security constraints live
//! in one JSON document, read once at startup from a file or from a Vault KV
//! secret. Nothing is mutated after startup; requests share it through `Arc`.
//!
//! ## Policy Defaults
//!
//! Paths that no deny rule covers are open to any authenticated caller. Inside
//! a deny rule, a role that is not listed gets nothing.

pub mod api;
pub mod cli;
pub mod config;
pub mod constraints;
pub mod identity;
pub mod repository;
pub mod tree;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
