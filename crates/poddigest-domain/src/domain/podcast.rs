//! Podcast and subscription entities.

use crate::domain::ids::{PodcastId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a feed. Created on first subscription, mutated by the feed
/// ingestor, never deleted while any episode references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: PodcastId,
    pub title: String,
    pub author: Option<String>,
    /// Unique across all podcasts.
    pub feed_url: String,
    pub artwork_url: Option<String>,
    pub external_id: Option<String>,
    pub last_crawled_at: Option<DateTime<Utc>>,
}

impl Podcast {
    /// Default lookback window used when `last_crawled_at` is unset.
    pub const DEFAULT_CRAWL_WINDOW_DAYS: i64 = 7;

    /// The cutoff before which episodes are considered already-seen: either
    /// the last successful crawl, or 7 days ago if never crawled.
    pub fn crawl_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_crawled_at
            .unwrap_or_else(|| now - chrono::Duration::days(Self::DEFAULT_CRAWL_WINDOW_DAYS))
    }
}

/// Priority a user assigns to a subscribed podcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Must,
    Preferred,
    Nice,
}

/// A (user, podcast) edge. Unique on (user_id, podcast_id). Deactivation is
/// a flag flip; there is no cascade delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub podcast_id: PodcastId,
    pub priority: Priority,
    pub active: bool,
}
