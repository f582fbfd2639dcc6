//! JSON shapes spoken by the REST service and their mapping onto the model.
//!
//! The service has one `twitter` feed type whose `config` map carries either
//! a `username` or a `hashtag`; the model splits those into two source kinds.
//! Timestamps come back without an offset and are read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::backend::{FetchOutcome, Membership};
use crate::model::{
    Assignment, AssignmentId, CategoryId, CategoryRecord, Feed, FeedId, Item, ItemId, NewFeed,
    SourceConfig, SourceKind,
};

const WIRE_RSS: &str = "rss";
const WIRE_TWITTER: &str = "twitter";

// ============================================================================
// Timestamps
// ============================================================================

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
    }
}

// ============================================================================
// Feeds
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct FeedDto {
    id: i64,
    name: String,
    url: String,
    feed_type: String,
    #[serde(default)]
    config: Option<SourceConfig>,
    #[serde(default)]
    category_id: Option<i64>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    last_fetched_at: Option<DateTime<Utc>>,
}

impl FeedDto {
    /// Resolve the wire feed type and config into a [`SourceKind`].
    pub(crate) fn into_feed(self) -> Result<Feed, String> {
        let config = self.config.unwrap_or_default();
        let kind = match self.feed_type.as_str() {
            WIRE_RSS => SourceKind::Rss,
            WIRE_TWITTER => match (&config.username, &config.hashtag) {
                (Some(_), None) => SourceKind::TwitterUser,
                (None, Some(_)) => SourceKind::TwitterHashtag,
                (Some(_), Some(_)) => {
                    return Err(format!(
                        "feed {} sets both username and hashtag",
                        self.id
                    ))
                }
                (None, None) => {
                    return Err(format!(
                        "feed {} sets neither username nor hashtag",
                        self.id
                    ))
                }
            },
            other => return Err(format!("feed {} has unknown type '{other}'", self.id)),
        };

        Ok(Feed {
            id: FeedId(self.id),
            name: self.name,
            url: self.url,
            kind,
            config: if kind.is_social() {
                config
            } else {
                SourceConfig::default()
            },
            category_id: self.category_id.map(CategoryId),
            last_fetched_at: self.last_fetched_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateFeedBody<'a> {
    name: &'a str,
    url: &'a str,
    feed_type: &'static str,
    config: &'a SourceConfig,
    category_id: Option<i64>,
}

impl<'a> From<&'a NewFeed> for CreateFeedBody<'a> {
    fn from(feed: &'a NewFeed) -> Self {
        Self {
            name: &feed.name,
            url: feed.wire_url(),
            feed_type: if feed.kind.is_social() {
                WIRE_TWITTER
            } else {
                WIRE_RSS
            },
            config: &feed.config,
            category_id: feed.category_id.map(CategoryId::get),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchDto {
    #[serde(default)]
    new_items: usize,
}

impl From<FetchDto> for FetchOutcome {
    fn from(dto: FetchDto) -> Self {
        FetchOutcome {
            new_items: dto.new_items,
        }
    }
}

// ============================================================================
// Categories
// ============================================================================

/// A category with its subtree, as the service nests them.
#[derive(Debug, Deserialize)]
pub(crate) struct CategoryDto {
    id: i64,
    name: String,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    children: Vec<CategoryDto>,
}

impl CategoryDto {
    pub(crate) fn record(&self) -> CategoryRecord {
        CategoryRecord {
            id: CategoryId(self.id),
            name: self.name.clone(),
            parent_id: self.parent_id.map(CategoryId),
        }
    }
}

/// Flatten a nested forest pre-order, so parents precede their children
/// and siblings keep the order they were sent in.
pub(crate) fn flatten_forest(roots: Vec<CategoryDto>) -> Vec<CategoryRecord> {
    let mut out = Vec::new();
    let mut stack: Vec<CategoryDto> = roots.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node.record());
        stack.extend(node.children.into_iter().rev());
    }
    out
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateCategoryBody<'a> {
    pub name: &'a str,
    pub parent_id: Option<i64>,
}

/// Only the fields present are changed; an explicit `null` parent moves the
/// category to the roots.
#[derive(Debug, Serialize)]
pub(crate) struct UpdateCategoryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<i64>>,
}

// ============================================================================
// Items and assignments
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ItemDto {
    id: i64,
    feed_id: i64,
    title: String,
    #[serde(default)]
    content: Option<String>,
    url: String,
    #[serde(default, deserialize_with = "optional_timestamp")]
    published_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    fetched_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    read_at: Option<DateTime<Utc>>,
}

impl From<ItemDto> for Item {
    fn from(dto: ItemDto) -> Self {
        Item {
            id: ItemId(dto.id),
            feed_id: FeedId(dto.feed_id),
            title: dto.title,
            body: dto.content,
            url: dto.url,
            published_at: dto.published_at,
            read_at: dto.read_at,
            fetched_at: dto.fetched_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AssignBody {
    pub category_id: i64,
    pub feed_item_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignmentDto {
    id: i64,
    category_id: i64,
    feed_item_id: i64,
}

impl From<AssignmentDto> for Assignment {
    fn from(dto: AssignmentDto) -> Self {
        Assignment {
            id: AssignmentId(dto.id),
            category_id: CategoryId(dto.category_id),
            item_id: ItemId(dto.feed_item_id),
        }
    }
}

/// The service lists an item's categories as bare ids.
pub(crate) fn memberships(category_ids: Vec<i64>) -> Vec<Membership> {
    category_ids
        .into_iter()
        .map(|id| Membership {
            category_id: CategoryId(id),
            assignment_id: None,
        })
        .collect()
}

// ============================================================================
// Errors
// ============================================================================

/// `{"detail": ...}` where detail is a message or a list of validation
/// entries carrying `msg`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    detail: serde_json::Value,
}

impl ErrorBody {
    pub(crate) fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry.get("msg").and_then(|m| m.as_str()) {
                    Some(msg) => msg.to_owned(),
                    None => entry.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn feed_json(feed_type: &str, config: serde_json::Value) -> FeedDto {
        serde_json::from_value(serde_json::json!({
            "id": 3,
            "user_id": 1,
            "name": "Source",
            "url": "N/A",
            "feed_type": feed_type,
            "config": config,
            "category_id": null,
            "created_at": "2024-01-01T00:00:00",
            "last_fetched_at": null
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_naive_and_offset_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T12:30:00+02:00"), Some(expected));
        assert!(parse_timestamp("2024-03-05T10:30:00.123456").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_twitter_config_maps_to_kind() {
        let user = feed_json("twitter", serde_json::json!({"username": "rustlang"}))
            .into_feed()
            .unwrap();
        assert_eq!(user.kind, SourceKind::TwitterUser);
        assert_eq!(user.config, SourceConfig::username("rustlang"));

        let tag = feed_json("twitter", serde_json::json!({"hashtag": "rust"}))
            .into_feed()
            .unwrap();
        assert_eq!(tag.kind, SourceKind::TwitterHashtag);
        assert_eq!(tag.source_url(), None);
    }

    #[test]
    fn test_bad_twitter_config_is_rejected() {
        assert!(feed_json("twitter", serde_json::json!({})).into_feed().is_err());
        assert!(
            feed_json("twitter", serde_json::json!({"username": "a", "hashtag": "b"}))
                .into_feed()
                .is_err()
        );
        assert!(feed_json("mastodon", serde_json::json!({})).into_feed().is_err());
    }

    #[test]
    fn test_rss_ignores_stray_config() {
        let feed = feed_json("rss", serde_json::json!({"username": "x"}))
            .into_feed()
            .unwrap();
        assert_eq!(feed.kind, SourceKind::Rss);
        assert_eq!(feed.config, SourceConfig::default());
    }

    #[test]
    fn test_create_body_uses_wire_type() {
        let request = NewFeed::twitter_hashtag("Rust", "rustlang");
        let body = serde_json::to_value(CreateFeedBody::from(&request)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "Rust",
                "url": "N/A",
                "feed_type": "twitter",
                "config": {"hashtag": "rustlang"},
                "category_id": null
            })
        );
    }

    #[test]
    fn test_flatten_forest_preorder() {
        let forest: Vec<CategoryDto> = serde_json::from_value(serde_json::json!([
            {"id": 1, "name": "Tech", "parent_id": null, "children": [
                {"id": 2, "name": "Rust", "parent_id": 1, "children": [
                    {"id": 4, "name": "Async", "parent_id": 2}
                ]},
                {"id": 3, "name": "Go", "parent_id": 1, "children": []}
            ]},
            {"id": 5, "name": "News", "parent_id": null, "children": []}
        ]))
        .unwrap();

        let ids: Vec<i64> = flatten_forest(forest).iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 4, 3, 5]);
    }

    #[test]
    fn test_update_body_distinguishes_root_from_unchanged() {
        let to_root = UpdateCategoryBody {
            name: None,
            parent_id: Some(None),
        };
        assert_eq!(
            serde_json::to_value(&to_root).unwrap(),
            serde_json::json!({"parent_id": null})
        );

        let rename = UpdateCategoryBody {
            name: Some("New"),
            parent_id: None,
        };
        assert_eq!(
            serde_json::to_value(&rename).unwrap(),
            serde_json::json!({"name": "New"})
        );
    }

    #[test]
    fn test_error_detail_shapes() {
        let plain: ErrorBody =
            serde_json::from_value(serde_json::json!({"detail": "Category not found"})).unwrap();
        assert_eq!(plain.message(), "Category not found");

        let list: ErrorBody = serde_json::from_value(serde_json::json!({
            "detail": [{"loc": ["body", "name"], "msg": "field required"}]
        }))
        .unwrap();
        assert_eq!(list.message(), "field required");
    }
}
