use anyhow::Result;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use super::PluginStore;

/// Namespace every subscription key lives under.
pub const NAMESPACE: &str = "forum-slack-bridge";

/// Forum entity kinds a channel can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Topics,
    Categories,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Topics => "topics",
            Collection::Categories => "categories",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn store_key(collection: Collection, id: u64) -> String {
    format!("following_{}_{}", collection, id)
}

/// Keeps the first occurrence of every channel.
fn dedupe(channels: &mut Vec<String>) {
    let mut seen = HashSet::new();
    channels.retain(|c| seen.insert(c.clone()));
}

/// Which chat channels follow which topics and categories.
#[derive(Clone)]
pub struct SubscriptionStore {
    store: PluginStore,
}

impl SubscriptionStore {
    pub fn new(store: PluginStore) -> Self {
        Self { store }
    }

    /// Channels following `(collection, id)`; empty when nothing was ever stored.
    pub async fn get(&self, collection: Collection, id: u64) -> Result<Vec<String>> {
        Ok(self
            .store
            .get(NAMESPACE, &store_key(collection, id))
            .await?
            .unwrap_or_default())
    }

    /// Replace the stored list with a deduplicated copy of `channels`.
    pub async fn set(
        &self,
        collection: Collection,
        id: u64,
        mut channels: Vec<String>,
    ) -> Result<()> {
        dedupe(&mut channels);
        self.store
            .set(NAMESPACE, &store_key(collection, id), &channels)
            .await
    }

    pub async fn follow(&self, collection: Collection, id: u64, channel: &str) -> Result<()> {
        let mut channels = self.get(collection, id).await?;
        channels.push(channel.to_string());
        debug!(%collection, id, channel, "following");
        self.set(collection, id, channels).await
    }

    /// Removes every occurrence of `channel`; a channel that is not present is a no-op.
    pub async fn unfollow(&self, collection: Collection, id: u64, channel: &str) -> Result<()> {
        let mut channels = self.get(collection, id).await?;
        channels.retain(|c| c != channel);
        debug!(%collection, id, channel, "unfollowing");
        self.set(collection, id, channels).await
    }

    /// With no channel: whether anyone follows the entity at all.
    /// With a channel: whether that channel is one of the followers.
    #[allow(dead_code)]
    pub async fn is_following(
        &self,
        collection: Collection,
        id: u64,
        channel: Option<&str>,
    ) -> Result<bool> {
        let channels = self.get(collection, id).await?;
        Ok(match channel {
            None => !channels.is_empty(),
            Some(channel) => channels.iter().any(|c| c == channel),
        })
    }
}
