use anyhow::Result;
use tracing::debug;

use crate::forum::ForumEvent;
use crate::slack::connection::ConnectionManager;
use crate::store::subscriptions::{Collection, SubscriptionStore};

/// Pushes forum activity to every channel following the affected entity.
#[derive(Debug, Default)]
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Which subscription list an event fans out to, and the link to post.
    fn target(event: &ForumEvent) -> Option<(Collection, u64, &str)> {
        match event {
            ForumEvent::PostCreated(post) => {
                Some((Collection::Topics, post.topic_id, post.url.as_str()))
            }
            ForumEvent::TopicCreated(topic) => topic
                .category_id
                .map(|category_id| (Collection::Categories, category_id, topic.url.as_str())),
        }
    }

    /// Returns how many sends were queued.
    pub async fn dispatch(
        &self,
        event: &ForumEvent,
        store: &SubscriptionStore,
        connection: &mut ConnectionManager,
    ) -> Result<usize> {
        let Some((collection, id, url)) = Self::target(event) else {
            return Ok(0);
        };

        let channels = store.get(collection, id).await?;
        debug!("{} {} has {} follower(s)", collection, id, channels.len());

        let mut queued = 0;
        for channel in &channels {
            if connection.send(url, channel).await {
                queued += 1;
            }
        }
        Ok(queued)
    }
}
