use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands::{failure_replies, invalid_url_reply, CommandInterpreter};
use crate::dispatch::NotificationDispatcher;
use crate::error::ErrorKind;
use crate::forum::ForumEvent;
use crate::slack::connection::ConnectionManager;
use crate::slack::{InboundMessage, SocketEvent};
use crate::store::subscriptions::SubscriptionStore;

/// The event loop state. Everything that touches the socket or the
/// subscription store runs through `&mut self`, one event at a time.
pub struct Bridge {
    enabled: bool,
    verbose_errors: bool,
    connection: ConnectionManager,
    subscriptions: SubscriptionStore,
    interpreter: CommandInterpreter,
    dispatcher: NotificationDispatcher,
}

impl Bridge {
    pub fn new(
        enabled: bool,
        verbose_errors: bool,
        connection: ConnectionManager,
        subscriptions: SubscriptionStore,
        interpreter: CommandInterpreter,
    ) -> Self {
        Self {
            enabled,
            verbose_errors,
            connection,
            subscriptions,
            interpreter,
            dispatcher: NotificationDispatcher,
        }
    }

    /// Connect eagerly. A failure here is not fatal: the next send retries.
    pub async fn start(&mut self) {
        if !self.enabled {
            info!("Bridge disabled, staying dormant");
            return;
        }
        if let Err(e) = self.connection.connect().await {
            warn!("Initial Slack connect failed, will retry on next send: {e}");
        }
        debug!("Connection state: {:?}", self.connection.state());
    }

    /// Pump both event sources until the forum side goes away. The socket side
    /// never closes on its own: the connection manager holds a sender for it.
    pub async fn run(
        mut self,
        mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
        mut forum_events: mpsc::UnboundedReceiver<ForumEvent>,
    ) {
        self.start().await;

        loop {
            tokio::select! {
                Some(event) = socket_events.recv() => self.handle_socket_event(event).await,
                event = forum_events.recv() => match event {
                    Some(event) => self.handle_forum_event(event).await,
                    None => break,
                },
            }
        }

        info!("Bridge event loop stopped");
    }

    pub async fn handle_socket_event(&mut self, event: SocketEvent) {
        if !self.enabled {
            return;
        }
        let Some(msg) = self.connection.handle_event(event) else {
            return;
        };
        let Some(bot_id) = self.connection.bot_id().map(str::to_string) else {
            return;
        };
        self.handle_command(&msg, &bot_id).await;
    }

    async fn handle_command(&mut self, msg: &InboundMessage, bot_id: &str) {
        let result = self
            .interpreter
            .interpret(msg, bot_id, &self.subscriptions)
            .await;

        let Some(channel) = msg.channel.as_deref() else {
            return;
        };

        match result {
            Ok(Some(reply)) => {
                self.connection.send(&reply, channel).await;
            }
            Ok(None) => {}
            Err(err) => match err.kind() {
                ErrorKind::InvalidUrl => {
                    debug!("{err}");
                    let user = msg.user.as_deref().unwrap_or_default();
                    self.connection.send(&invalid_url_reply(user), channel).await;
                }
                ErrorKind::ResolutionMiss => {
                    debug!("Ignoring command: {err}");
                }
                _ => {
                    error!("Command in {} failed: {:#}", channel, err);
                    for reply in failure_replies(&err, self.verbose_errors) {
                        self.connection.send(&reply, channel).await;
                    }
                }
            },
        }
    }

    pub async fn handle_forum_event(&mut self, event: ForumEvent) {
        if !self.enabled {
            return;
        }

        match &event {
            ForumEvent::PostCreated(post) => {
                debug!("Post {} created in topic {}", post.id, post.topic_id)
            }
            ForumEvent::TopicCreated(topic) => {
                debug!("Topic {} created in category {:?}", topic.id, topic.category_id)
            }
        }

        if let Err(e) = self
            .dispatcher
            .dispatch(&event, &self.subscriptions, &mut self.connection)
            .await
        {
            error!("Failed to notify followers: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forum::categories::StaticCategories;
    use crate::forum::routes::ForumRoutes;
    use crate::forum::{Post, Topic};
    use crate::slack::connection::testing::FakeConnector;
    use crate::store::subscriptions::Collection;
    use crate::store::PluginStore;
    use std::sync::Arc;

    fn bridge(enabled: bool) -> (Arc<FakeConnector>, Bridge, SubscriptionStore) {
        let connector = Arc::new(FakeConnector::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(connector.clone(), tx);
        let subscriptions = SubscriptionStore::new(PluginStore::open_in_memory().unwrap());
        let interpreter = CommandInterpreter::new(
            Arc::new(ForumRoutes),
            Arc::new(StaticCategories::default()),
            "",
        );
        let bridge = Bridge::new(
            enabled,
            false,
            connection,
            subscriptions.clone(),
            interpreter,
        );
        (connector, bridge, subscriptions)
    }

    fn frame(session: u64, text: &str) -> SocketEvent {
        let body = serde_json::json!({
            "type": "message",
            "text": text,
            "channel": "C1",
            "user": "U42",
        });
        SocketEvent::Frame {
            session,
            text: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_follow_command_end_to_end() {
        let (connector, mut bridge, subs) = bridge(true);
        bridge.start().await;

        bridge
            .handle_socket_event(frame(1, "<@UBOT> follow <http://forum/t/my-topic/42>"))
            .await;

        assert_eq!(subs.get(Collection::Topics, 42).await.unwrap(), vec!["C1"]);
        assert_eq!(
            connector.sent(),
            vec![serde_json::json!({
                "id": 1,
                "type": "message",
                "channel": "C1",
                "text": "Added 42 to followed topics",
            })]
        );
    }

    #[tokio::test]
    async fn test_invalid_url_gets_apology_and_no_mutation() {
        let (connector, mut bridge, subs) = bridge(true);
        bridge.start().await;

        bridge
            .handle_socket_event(frame(1, "<@UBOT> follow <not_a_url>"))
            .await;

        let sent = connector.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["text"], "I'm sorry, <@U42>, that's not a valid URL!");
        assert_eq!(sent[0]["channel"], "C1");
        assert!(subs.get(Collection::Topics, 42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_miss_is_silent() {
        let (connector, mut bridge, _subs) = bridge(true);
        bridge.start().await;

        bridge
            .handle_socket_event(frame(1, "<@UBOT> follow <http://forum/about>"))
            .await;

        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_processing_failure_is_reported_without_detail() {
        let (connector, mut bridge, _subs) = bridge(true);
        bridge.start().await;

        // The static directory is empty, so the category cannot be resolved.
        bridge
            .handle_socket_event(frame(1, "<@UBOT> follow <http://forum/c/missing>"))
            .await;

        let sent = connector.sent();
        assert_eq!(sent.len(), 1);
        let text = sent[0]["text"].as_str().unwrap();
        assert!(!text.contains("missing"));
    }

    #[tokio::test]
    async fn test_post_event_notifies_followers() {
        let (connector, mut bridge, subs) = bridge(true);
        subs.follow(Collection::Topics, 42, "C1").await.unwrap();
        subs.follow(Collection::Topics, 42, "C2").await.unwrap();

        bridge
            .handle_forum_event(ForumEvent::PostCreated(Post {
                id: 500,
                topic_id: 42,
                url: "https://forum/t/x/42/5".to_string(),
            }))
            .await;

        // No session yet: the first send connected lazily.
        assert_eq!(connector.attempts(), 1);
        let sent = connector.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["channel"], "C1");
        assert_eq!(sent[1]["channel"], "C2");
        assert!(sent.iter().all(|f| f["text"] == "https://forum/t/x/42/5"));
    }

    #[tokio::test]
    async fn test_disabled_bridge_stays_dormant() {
        let (connector, mut bridge, subs) = bridge(false);
        subs.follow(Collection::Categories, 5, "C1").await.unwrap();

        bridge.start().await;
        bridge
            .handle_socket_event(frame(1, "<@UBOT> follow <http://forum/t/my-topic/42>"))
            .await;
        bridge
            .handle_forum_event(ForumEvent::TopicCreated(Topic {
                id: 9,
                category_id: Some(5),
                url: "https://forum/t/x/9".to_string(),
            }))
            .await;

        assert_eq!(connector.attempts(), 0);
        assert!(connector.sent().is_empty());
        assert!(subs.get(Collection::Topics, 42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_forum_side_closes() {
        // Wired as in main: the manager keeps the socket sender alive.
        let connector = Arc::new(FakeConnector::default());
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(connector.clone(), socket_tx);
        let subs = SubscriptionStore::new(PluginStore::open_in_memory().unwrap());
        let interpreter = CommandInterpreter::new(
            Arc::new(ForumRoutes),
            Arc::new(StaticCategories::default()),
            "",
        );
        let bridge = Bridge::new(true, false, connection, subs.clone(), interpreter);
        subs.follow(Collection::Topics, 1, "C1").await.unwrap();

        let (forum_tx, forum_rx) = mpsc::unbounded_channel();
        forum_tx
            .send(ForumEvent::PostCreated(Post {
                id: 2,
                topic_id: 1,
                url: "https://forum/t/x/1/2".to_string(),
            }))
            .unwrap();
        drop(forum_tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), bridge.run(socket_rx, forum_rx))
            .await
            .expect("loop must stop once the forum side closes");

        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.sent().len(), 1);
    }
}
