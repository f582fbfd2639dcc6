use chrono::{DateTime, NaiveDate, Utc};

use crate::model::{CategoryId, FeedId};
use crate::util::MAX_TEXT_QUERY_LENGTH;

/// What the user is looking at. Category and feed selection exclude each
/// other by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Selection {
    /// Nothing selected: every known item.
    #[default]
    None,
    Category(CategoryId),
    Feed(FeedId),
}

impl Selection {
    pub fn category(self) -> Option<CategoryId> {
        match self {
            Selection::Category(id) => Some(id),
            _ => None,
        }
    }

    pub fn feed(self) -> Option<FeedId> {
        match self {
            Selection::Feed(id) => Some(id),
            _ => None,
        }
    }
}

/// Filter predicates applied on top of a selection.
///
/// Build through the setters so the text query is normalized; two specs that
/// filter the same way compare equal and share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterSpec {
    pub unread_only: bool,
    text_query: Option<String>,
    pub since: Option<NaiveDate>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unread_only(mut self, unread_only: bool) -> Self {
        self.unread_only = unread_only;
        self
    }

    /// Set the free-text query. Blank input clears it; long input is cut at
    /// [`MAX_TEXT_QUERY_LENGTH`] characters.
    pub fn text(mut self, query: &str) -> Self {
        let trimmed = query.trim();
        self.text_query = if trimmed.is_empty() {
            None
        } else {
            Some(
                trimmed
                    .chars()
                    .take(MAX_TEXT_QUERY_LENGTH)
                    .collect::<String>()
                    .to_lowercase(),
            )
        };
        self
    }

    pub fn since(mut self, since: Option<NaiveDate>) -> Self {
        self.since = since;
        self
    }

    /// Lowercased query, `None` when no text filter is active.
    pub fn text_query(&self) -> Option<&str> {
        self.text_query.as_deref()
    }

    /// The `since` bound as an instant: start of that day, UTC.
    pub fn since_instant(&self) -> Option<DateTime<Utc>> {
        self.since.map(start_of_day)
    }

    pub fn is_empty(&self) -> bool {
        !self.unread_only && self.text_query.is_none() && self.since.is_none()
    }
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
