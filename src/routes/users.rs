//! Allow/deny registry introspection
//!
//! - `/{feed}/users` lists both sides
//! - `/{feed}/users/valid` and `/{feed}/users/invalid` list one side
//!
//! An unknown feed answers with empty lists.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::generator::Verdict;
use crate::server::AppState;

/// Which part of the registry a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsersKind {
    All,
    Valid,
    Invalid,
}

/// A parsed users path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersRoute {
    pub feed: String,
    pub kind: UsersKind,
}

impl UsersRoute {
    /// Match `/{feed}/users[/valid|/invalid][/]`
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.strip_prefix('/')?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let segments: Vec<&str> = trimmed.split('/').collect();

        let kind = match segments.as_slice() {
            [_, "users"] => UsersKind::All,
            [_, "users", "valid"] => UsersKind::Valid,
            [_, "users", "invalid"] => UsersKind::Invalid,
            _ => return None,
        };
        if segments[0].is_empty() {
            return None;
        }
        Some(Self {
            feed: segments[0].to_string(),
            kind,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct FeedUsers {
    pub feed: String,
    pub valid_users: Vec<String>,
    pub invalid_users: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedUserList {
    pub feed: String,
    pub users: Vec<String>,
}

pub fn feed_users(state: &AppState, route: UsersRoute) -> Response<Full<Bytes>> {
    let feed = state.registry.get(&route.feed);
    let list = |verdict: Verdict| {
        feed.as_ref()
            .and_then(|feed| feed.ruleset())
            .map(|ruleset| ruleset.users.with_verdict(verdict))
            .unwrap_or_default()
    };

    match route.kind {
        UsersKind::All => json_response(
            StatusCode::OK,
            &FeedUsers {
                valid_users: list(Verdict::Allow),
                invalid_users: list(Verdict::Deny),
                feed: route.feed,
            },
        ),
        UsersKind::Valid => json_response(
            StatusCode::OK,
            &FeedUserList {
                users: list(Verdict::Allow),
                feed: route.feed,
            },
        ),
        UsersKind::Invalid => json_response(
            StatusCode::OK,
            &FeedUserList {
                users: list(Verdict::Deny),
                feed: route.feed,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_users_paths() {
        assert_eq!(
            UsersRoute::parse("/AzPulse/users"),
            Some(UsersRoute {
                feed: "AzPulse".into(),
                kind: UsersKind::All
            })
        );
        assert_eq!(
            UsersRoute::parse("/AzPulse/users/valid/").map(|r| r.kind),
            Some(UsersKind::Valid)
        );
        assert_eq!(
            UsersRoute::parse("/AzPulse/users/invalid").map(|r| r.kind),
            Some(UsersKind::Invalid)
        );
        assert_eq!(UsersRoute::parse("//users"), None);
        assert_eq!(UsersRoute::parse("/AzPulse/posts"), None);
        assert_eq!(UsersRoute::parse("/AzPulse/users/other"), None);
    }
}
