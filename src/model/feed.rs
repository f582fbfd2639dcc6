//! Feed definitions and the registry holding them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::ids::{CategoryId, FeedId};
use super::validation::ValidationError;
use crate::util::{normalize_name, validate_source_url};

/// URL placeholder stored for sources that have no URL of their own.
pub const NO_SOURCE_URL: &str = "N/A";

/// What a feed pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Rss,
    TwitterUser,
    TwitterHashtag,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::TwitterUser => "twitter-user",
            SourceKind::TwitterHashtag => "twitter-hashtag",
        }
    }

    pub fn is_social(self) -> bool {
        !matches!(self, SourceKind::Rss)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(SourceKind::Rss),
            "twitter-user" => Ok(SourceKind::TwitterUser),
            "twitter-hashtag" => Ok(SourceKind::TwitterHashtag),
            other => Err(format!(
                "unknown source kind '{other}' (expected rss, twitter-user or twitter-hashtag)"
            )),
        }
    }
}

/// Source-specific settings. Which field may be set depends on the kind:
/// `rss` takes neither, `twitter-user` takes `username`, `twitter-hashtag`
/// takes `hashtag`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtag: Option<String>,
}

impl SourceConfig {
    pub fn username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            hashtag: None,
        }
    }

    pub fn hashtag(hashtag: impl Into<String>) -> Self {
        Self {
            username: None,
            hashtag: Some(hashtag.into()),
        }
    }

    fn is_empty(&self) -> bool {
        self.username.is_none() && self.hashtag.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    /// Source URL, or [`NO_SOURCE_URL`] for social sources.
    pub url: String,
    pub kind: SourceKind,
    pub config: SourceConfig,
    pub category_id: Option<CategoryId>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Feed {
    /// The real source URL, if this feed has one.
    pub fn source_url(&self) -> Option<&str> {
        if self.url == NO_SOURCE_URL || self.url.is_empty() {
            None
        } else {
            Some(&self.url)
        }
    }
}

/// A request to create a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeed {
    pub name: String,
    pub kind: SourceKind,
    pub url: Option<String>,
    pub config: SourceConfig,
    pub category_id: Option<CategoryId>,
}

impl NewFeed {
    pub fn rss(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Rss,
            url: Some(url.into()),
            config: SourceConfig::default(),
            category_id: None,
        }
    }

    pub fn twitter_user(name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::TwitterUser,
            url: None,
            config: SourceConfig::username(username),
            category_id: None,
        }
    }

    pub fn twitter_hashtag(name: impl Into<String>, hashtag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::TwitterHashtag,
            url: None,
            config: SourceConfig::hashtag(hashtag),
            category_id: None,
        }
    }

    pub fn in_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// URL to send to the backend: the validated URL or the placeholder.
    pub fn wire_url(&self) -> &str {
        self.url.as_deref().unwrap_or(NO_SOURCE_URL)
    }
}

/// Trim a config field and treat blank as absent. Leading `@`/`#` sigils are
/// dropped so `@rustlang` and `rustlang` mean the same account.
fn clean_field(value: Option<String>, sigil: char) -> Option<String> {
    value
        .map(|v| v.trim().trim_start_matches(sigil).trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Holds known feeds in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FeedRegistry {
    feeds: Vec<Feed>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize a create request.
    ///
    /// Runs before any backend call. On success the returned request has a
    /// sanitized name, trimmed fields and a URL only when the kind uses one.
    pub fn validate(request: NewFeed) -> Result<NewFeed, ValidationError> {
        let name = normalize_name(&request.name).ok_or(ValidationError::EmptyName)?;
        let username = clean_field(request.config.username, '@');
        let hashtag = clean_field(request.config.hashtag, '#');
        let url = request
            .url
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty() && u != NO_SOURCE_URL);

        let (url, config) = match request.kind {
            SourceKind::Rss => {
                if username.is_some() {
                    return Err(ValidationError::UnexpectedSourceField {
                        kind: request.kind,
                        field: "username",
                    });
                }
                if hashtag.is_some() {
                    return Err(ValidationError::UnexpectedSourceField {
                        kind: request.kind,
                        field: "hashtag",
                    });
                }
                let url = url.ok_or(ValidationError::MissingUrl)?;
                let parsed = validate_source_url(&url)?;
                (Some(parsed.to_string()), SourceConfig::default())
            }
            kind => {
                let config = SourceConfig { username, hashtag };
                if config.username.is_some() && config.hashtag.is_some() {
                    return Err(ValidationError::ConflictingSourceFields);
                }
                if config.is_empty() {
                    let field = if kind == SourceKind::TwitterUser {
                        "username"
                    } else {
                        "hashtag"
                    };
                    return Err(ValidationError::MissingSourceField { kind, field });
                }
                match (kind, &config) {
                    (SourceKind::TwitterUser, SourceConfig { hashtag: Some(_), .. }) => {
                        return Err(ValidationError::UnexpectedSourceField {
                            kind,
                            field: "hashtag",
                        });
                    }
                    (SourceKind::TwitterHashtag, SourceConfig { username: Some(_), .. }) => {
                        return Err(ValidationError::UnexpectedSourceField {
                            kind,
                            field: "username",
                        });
                    }
                    _ => {}
                }
                (url, config)
            }
        };

        Ok(NewFeed {
            name,
            kind: request.kind,
            url,
            config,
            category_id: request.category_id,
        })
    }

    /// Add a feed, replacing any feed with the same id in place.
    pub fn insert(&mut self, feed: Feed) {
        match self.feeds.iter_mut().find(|f| f.id == feed.id) {
            Some(slot) => *slot = feed,
            None => self.feeds.push(feed),
        }
    }

    /// Remove a feed. Items referencing it are untouched.
    pub fn delete(&mut self, id: FeedId) -> Option<Feed> {
        let pos = self.feeds.iter().position(|f| f.id == id)?;
        Some(self.feeds.remove(pos))
    }

    /// Detach every feed from a deleted category. Returns how many moved.
    pub fn unbind_category(&mut self, category: CategoryId) -> usize {
        let mut moved = 0;
        for feed in self.feeds.iter_mut().filter(|f| f.category_id == Some(category)) {
            feed.category_id = None;
            moved += 1;
        }
        moved
    }

    pub fn get(&self, id: FeedId) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.id == id)
    }

    pub fn contains(&self, id: FeedId) -> bool {
        self.get(id).is_some()
    }

    /// Feeds for a category selection.
    ///
    /// `None` means nothing is selected and returns **every** feed, including
    /// feeds that belong to a category. It is not an "uncategorized" filter.
    pub fn list_by_category(&self, category: Option<CategoryId>) -> Vec<&Feed> {
        match category {
            None => self.feeds.iter().collect(),
            Some(c) => self
                .feeds
                .iter()
                .filter(|f| f.category_id == Some(c))
                .collect(),
        }
    }

    /// Ids of feeds bound to `category`.
    pub fn ids_in_category(&self, category: CategoryId) -> HashSet<FeedId> {
        self.feeds
            .iter()
            .filter(|f| f.category_id == Some(category))
            .map(|f| f.id)
            .collect()
    }

    /// Feed name for display; `None` means "unknown feed".
    pub fn display_name(&self, id: FeedId) -> Option<&str> {
        self.get(id).map(|f| f.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feed> {
        self.feeds.iter()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}
