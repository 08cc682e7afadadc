//! Deliverer (component I, §4.I).
//!
//! Dispatches on `DigestConfig.deliveryMethod`. `syndication` regenerates a
//! per-user RSS 2.0 feed by hand (no XML-writer crate — the teacher's own
//! manifest/report emitters build markup with `format!` and the domain
//! crate's `escape_xml`, so this follows suit), listing every completed
//! digest for the user newest-first. `email`/`push` are best-effort: a
//! `Notifier` failure is logged and does not fail the digest. `inApp`
//! requires no action at all — the clips are already queryable through the
//! repository.

use async_trait::async_trait;
use poddigest_domain::{
    escape_xml, format_hhmmss, Digest, DigestConfig, DeliveryMethod, UserId,
};
use poddigest_state::{ObjectStore, Repository};
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notifier error: {0}")]
    Failed(String),
}

/// Best-effort side channels. A failure here never fails the digest
///: the syndication feed is the only delivery method the spec
/// treats as load-bearing.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_push(&self, user_id: UserId, digest: &Digest) -> Result<(), NotifierError>;
    async fn send_email(&self, user_id: UserId, digest: &Digest) -> Result<(), NotifierError>;
}

pub struct DeliveryResult {
    pub feed_object_key: Option<String>,
}

pub struct Deliverer<R: Repository, O: ObjectStore, N: Notifier> {
    repo: Arc<R>,
    object_store: Arc<O>,
    notifier: Arc<N>,
    public_base_title: String,
}

impl<R: Repository, O: ObjectStore, N: Notifier> Deliverer<R, O, N> {
    pub fn new(repo: Arc<R>, object_store: Arc<O>, notifier: Arc<N>, public_base_title: String) -> Self {
        Self {
            repo,
            object_store,
            notifier,
            public_base_title,
        }
    }

    #[instrument(skip(self, digest, config), fields(digest_id = %digest.id))]
    pub async fn deliver(&self, digest: &Digest, config: &DigestConfig) -> Result<DeliveryResult, String> {
        match config.delivery_method {
            DeliveryMethod::Syndication => {
                let feed_xml = self.build_feed_xml(digest).await?;
                let key = format!("feeds/{}/feed.xml", digest.user_id);
                self.object_store
                    .put(&key, feed_xml.into_bytes(), "application/rss+xml")
                    .await
                    .map_err(|e| format!("feed upload failed: {e}"))?;
                Ok(DeliveryResult {
                    feed_object_key: Some(key),
                })
            }
            DeliveryMethod::Push => {
                if let Err(e) = self.notifier.send_push(digest.user_id, digest).await {
                    warn!(digest_id = %digest.id, error = %e, "push notification failed, digest still completes");
                }
                Ok(DeliveryResult { feed_object_key: None })
            }
            DeliveryMethod::Email => {
                if let Err(e) = self.notifier.send_email(digest.user_id, digest).await {
                    warn!(digest_id = %digest.id, error = %e, "email notification failed, digest still completes");
                }
                Ok(DeliveryResult { feed_object_key: None })
            }
            DeliveryMethod::InApp => Ok(DeliveryResult { feed_object_key: None }),
        }
    }

    /// Build the per-user RSS 2.0 feed with the iTunes and Atom namespaces
    ///: every completed digest for the user, newest `createdAt` first.
    /// `digest` itself may not yet be `completed` in the repository (the
    /// orchestrator flips that status after delivery succeeds), so it is
    /// merged in ahead of whatever `list_completed_digests_for_user`
    /// returns rather than assumed to already be there.
    async fn build_feed_xml(&self, digest: &Digest) -> Result<String, String> {
        let mut digests = self
            .repo
            .list_completed_digests_for_user(digest.user_id)
            .await
            .map_err(|e| format!("listing completed digests failed: {e}"))?;
        if !digests.iter().any(|d| d.id == digest.id) {
            digests.insert(0, digest.clone());
        }
        digests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let channel_title = escape_xml(&self.public_base_title);
        let feed_key = format!("feeds/{}/feed.xml", digest.user_id);
        let feed_url = self.object_store.public_url(&feed_key);
        let channel_description = escape_xml(&format!(
            "Personalized weekly podcast digest feed for {}",
            digest.user_id
        ));
        let channel_author = escape_xml(&self.public_base_title);

        let mut items = String::new();
        for d in &digests {
            items.push_str(&self.build_item_xml(d));
        }

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>{channel_title}</title>
    <description>{channel_description}</description>
    <link>{feed_url}</link>
    <language>en-us</language>
    <atom:link href="{feed_url}" rel="self" type="application/rss+xml" />
    <itunes:author>{channel_author}</itunes:author>
    <itunes:summary>{channel_description}</itunes:summary>
    <ttl>5</ttl>
{items}  </channel>
</rss>
"#,
            channel_title = channel_title,
            channel_description = channel_description,
            feed_url = feed_url,
            channel_author = channel_author,
            items = items,
        ))
    }

    fn build_item_xml(&self, digest: &Digest) -> String {
        let title = escape_xml(&digest.title);
        let audio_url = digest
            .audio_object_key
            .as_deref()
            .map(|key| self.object_store.public_url(key))
            .unwrap_or_default();
        let duration = format_hhmmss(digest.total_duration_sec.unwrap_or(0.0).round() as u64);
        let pub_date = digest.week_end.to_rfc2822();
        let description = escape_xml(&format!(
            "{} clip{} from your subscriptions this week",
            digest.clip_count,
            if digest.clip_count == 1 { "" } else { "s" }
        ));

        format!(
            r#"    <item>
      <title>{title}</title>
      <description>{description}</description>
      <enclosure url="{audio_url}" length="0" type="audio/mpeg" />
      <guid isPermaLink="false">{guid}</guid>
      <pubDate>{pub_date}</pubDate>
      <itunes:duration>{duration}</itunes:duration>
    </item>
"#,
            title = title,
            description = description,
            audio_url = audio_url,
            guid = digest.id,
            pub_date = pub_date,
            duration = duration,
        )
    }
}
