//! Classification ruleset
//!
//! A ruleset is immutable once built. [`ClassificationRuleset::classify`]
//! looks only at the post and the ruleset, so it can run anywhere without
//! touching the network or a store.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::db::schemas::RawPost;
use crate::types::{FeedgenError, Result};

/// Posts tagged with this many languages or more are not trusted on the
/// primary-language rule alone
pub const DEFAULT_MAX_LANGUAGES: usize = 3;

/// Explicit verdict for an author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Per-author overrides
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: HashMap<String, Verdict>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, did: impl Into<String>, verdict: Verdict) -> Self {
        self.users.insert(did.into(), verdict);
        self
    }

    /// `None` means the registry has no opinion on this author
    pub fn verdict(&self, did: &str) -> Option<Verdict> {
        self.users.get(did).copied()
    }

    /// Sorted DIDs with the given verdict
    pub fn with_verdict(&self, verdict: Verdict) -> Vec<String> {
        let mut dids: Vec<String> = self
            .users
            .iter()
            .filter(|(_, v)| **v == verdict)
            .map(|(did, _)| did.clone())
            .collect();
        dids.sort();
        dids
    }

    /// Every DID in the registry, sorted
    pub fn all(&self) -> Vec<String> {
        let mut dids: Vec<String> = self.users.keys().cloned().collect();
        dids.sort();
        dids
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(String, Verdict)> for UserRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Verdict)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

/// Which rule decided a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Reply deeper than the first level of a thread
    NestedReply,
    /// Author listed in the registry
    Registry,
    PrimaryLanguage,
    Keyword,
    NoMatch,
}

/// Result of classifying one post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub rule: Rule,
}

impl Decision {
    fn new(verdict: Verdict, rule: Rule) -> Self {
        Self { verdict, rule }
    }

    pub fn accepted(&self) -> bool {
        self.verdict.is_allow()
    }
}

/// Curation rules for one feed
#[derive(Debug, Clone)]
pub struct ClassificationRuleset {
    pub name: String,
    pub users: UserRegistry,
    pub primary_language: String,
    /// The primary-language rule needs strictly fewer languages than this
    pub max_languages: usize,
    pub keywords: Regex,
    /// A keyword match only counts when the post is tagged with one of these
    pub secondary_languages: HashSet<String>,
}

impl ClassificationRuleset {
    /// Decide whether a post belongs in the feed. First matching rule wins.
    pub fn classify(&self, post: &RawPost) -> Decision {
        if post.reply.as_ref().is_some_and(|reply| !reply.is_top_level()) {
            return Decision::new(Verdict::Deny, Rule::NestedReply);
        }

        if let Some(verdict) = self.users.verdict(&post.did) {
            return Decision::new(verdict, Rule::Registry);
        }

        if post.langs.iter().any(|lang| *lang == self.primary_language)
            && post.langs.len() < self.max_languages
        {
            return Decision::new(Verdict::Allow, Rule::PrimaryLanguage);
        }

        if self.keywords.is_match(&post.text)
            && post
                .langs
                .iter()
                .any(|lang| self.secondary_languages.contains(lang))
        {
            return Decision::new(Verdict::Allow, Rule::Keyword);
        }

        Decision::new(Verdict::Deny, Rule::NoMatch)
    }

    /// Load a ruleset from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FeedgenError::Config(format!("cannot read ruleset {}: {}", path.display(), e))
        })?;
        let spec: RulesetSpec = serde_json::from_str(&raw).map_err(|e| {
            FeedgenError::Config(format!("invalid ruleset {}: {}", path.display(), e))
        })?;
        spec.build()
    }
}

/// Serialized form of a ruleset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetSpec {
    pub name: String,
    pub primary_language: String,
    #[serde(default = "default_max_languages")]
    pub max_languages: usize,
    /// Matched case-insensitively against the post text
    pub keywords: String,
    #[serde(default)]
    pub secondary_languages: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_max_languages() -> usize {
    DEFAULT_MAX_LANGUAGES
}

impl RulesetSpec {
    pub fn build(self) -> Result<ClassificationRuleset> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(FeedgenError::Config(format!(
                "ruleset name must be a non-empty path segment, got '{}'",
                self.name
            )));
        }
        let keywords = RegexBuilder::new(&self.keywords)
            .case_insensitive(true)
            .build()
            .map_err(|e| FeedgenError::Config(format!("invalid keyword pattern: {}", e)))?;

        // Deny wins when a DID is listed twice
        let users = self
            .allow
            .into_iter()
            .map(|did| (did, Verdict::Allow))
            .chain(self.deny.into_iter().map(|did| (did, Verdict::Deny)))
            .collect();

        Ok(ClassificationRuleset {
            name: self.name,
            users,
            primary_language: self.primary_language,
            max_languages: self.max_languages,
            keywords,
            secondary_languages: self.secondary_languages.into_iter().collect(),
        })
    }
}
