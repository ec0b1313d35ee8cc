use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::error::BridgeError;
use crate::forum::categories::{resolve_category, CategoryDirectory};
use crate::forum::routes::{Route, RouteResolver};
use crate::slack::InboundMessage;
use crate::store::subscriptions::{Collection, SubscriptionStore};

const FOLLOW_WORDS: &[&str] = &[
    "follow", "f", "subscribe", "sub", "s", "track", "t", "add", "a",
];
const UNFOLLOW_WORDS: &[&str] = &[
    "unfollow", "u", "unsubscribe", "unsub", "untrack", "remove", "r",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Follow,
    Unfollow,
}

impl Verb {
    pub fn classify(word: &str) -> Option<Self> {
        if FOLLOW_WORDS.contains(&word) {
            Some(Verb::Follow)
        } else if UNFOLLOW_WORDS.contains(&word) {
            Some(Verb::Unfollow)
        } else {
            None
        }
    }
}

/// Strip one opening and one closing bracket, and the `|label` part of chat links.
fn strip_delimiters(token: &str) -> &str {
    let token = token
        .strip_prefix(|c: char| matches!(c, '<' | '(' | '[' | '{'))
        .unwrap_or(token);
    let token = token
        .strip_suffix(|c: char| matches!(c, '>' | ')' | ']' | '}'))
        .unwrap_or(token);
    token.split('|').next().unwrap_or(token)
}

pub fn invalid_url_reply(user: &str) -> String {
    format!("I'm sorry, <@{user}>, that's not a valid URL!")
}

/// Messages posted back when a command fails unexpectedly.
pub fn failure_replies(err: &BridgeError, verbose: bool) -> Vec<String> {
    if verbose {
        vec![
            format!("```\n{err:#}\n```"),
            format!("```\n{err:?}\n```"),
        ]
    } else {
        vec!["Sorry, something went wrong while handling that command.".to_string()]
    }
}

/// Turns chat messages addressed to the bot into follow/unfollow operations.
pub struct CommandInterpreter {
    routes: Arc<dyn RouteResolver>,
    categories: Arc<dyn CategoryDirectory>,
    base_path: String,
}

impl CommandInterpreter {
    pub fn new(
        routes: Arc<dyn RouteResolver>,
        categories: Arc<dyn CategoryDirectory>,
        base_path: &str,
    ) -> Self {
        Self {
            routes,
            categories,
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    /// Handle one inbound message. `Ok(Some(reply))` is the confirmation for the
    /// origin channel; `Ok(None)` means the message was not a command we act on.
    pub async fn interpret(
        &self,
        msg: &InboundMessage,
        bot_id: &str,
        store: &SubscriptionStore,
    ) -> Result<Option<String>, BridgeError> {
        if !msg.is_message() {
            return Ok(None);
        }
        let (Some(text), Some(channel)) = (msg.text.as_deref(), msg.channel.as_deref()) else {
            return Ok(None);
        };
        if !text.contains(bot_id) || msg.user.as_deref() == Some(bot_id) {
            return Ok(None);
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [_, verb, target] => self.apply(verb, target, channel, store).await,
            [_, _, _, _] => {
                // TODO: follow a category by slug (`@bot follow category <slug>`)
                debug!("Ignoring four-token command: {}", text);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn apply(
        &self,
        verb: &str,
        target: &str,
        channel: &str,
        store: &SubscriptionStore,
    ) -> Result<Option<String>, BridgeError> {
        let raw = strip_delimiters(target);
        let url = Url::parse(raw).map_err(|source| BridgeError::InvalidUrl {
            token: raw.to_string(),
            source,
        })?;

        let (collection, id) = self.resolve(&url).await?;

        let Some(verb) = Verb::classify(verb) else {
            debug!("Unknown verb '{}' for {} {}", verb, collection, id);
            return Ok(None);
        };

        match verb {
            Verb::Follow => {
                store.follow(collection, id, channel).await?;
                info!("Channel {} now follows {} {}", channel, collection, id);
                Ok(Some(format!("Added {id} to followed {collection}")))
            }
            Verb::Unfollow => {
                store.unfollow(collection, id, channel).await?;
                info!("Channel {} no longer follows {} {}", channel, collection, id);
                Ok(Some(format!("Removed {id} from followed {collection}")))
            }
        }
    }

    async fn resolve(&self, url: &Url) -> Result<(Collection, u64), BridgeError> {
        let full_path = url.path();
        let path = full_path
            .strip_prefix(self.base_path.as_str())
            .unwrap_or(full_path);

        match self.routes.recognize(path) {
            Some(Route::Topic { topic_id }) => Ok((Collection::Topics, topic_id)),
            Some(Route::Category { segment }) => {
                let category = resolve_category(self.categories.as_ref(), &segment)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No category matches '{segment}'"))?;
                Ok((Collection::Categories, category.id))
            }
            None => Err(BridgeError::ResolutionMiss(path.to_string())),
        }
    }
}
