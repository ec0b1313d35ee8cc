mod bridge;
mod commands;
mod config;
mod dispatch;
mod error;
mod forum;
mod slack;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::Bridge;
use crate::commands::CommandInterpreter;
use crate::config::Config;
use crate::forum::categories::{CategoryDirectory, ForumCategories, StaticCategories};
use crate::forum::routes::ForumRoutes;
use crate::forum::webhook::{self, WebhookState};
use crate::slack::connection::{ConnectionManager, RtmConnector};
use crate::store::subscriptions::SubscriptionStore;
use crate::store::PluginStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forum_slack_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Enabled: {}", config.slack.enabled);
    info!("  Forum: {}", config.forum.base_url);
    info!("  Webhook: {}", config.webhook.listen);
    info!("  Store: {}", config.store.database_path.display());

    let plugin_store = PluginStore::open(&config.store.database_path)?;
    let subscriptions = SubscriptionStore::new(plugin_store);

    let categories: Arc<dyn CategoryDirectory> = if config.forum.categories.is_empty() {
        Arc::new(ForumCategories::new(&config.forum))
    } else {
        info!("  Categories: {} configured", config.forum.categories.len());
        Arc::new(StaticCategories::new(config.forum.categories.clone()))
    };
    let interpreter =
        CommandInterpreter::new(Arc::new(ForumRoutes), categories, &config.forum.base_path);

    let (socket_tx, socket_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(RtmConnector::new(
        &config.slack.api_base,
        &config.slack.bot_token,
    ));
    let connection = ConnectionManager::new(connector, socket_tx);

    let bridge = Bridge::new(
        config.slack.enabled,
        config.slack.verbose_errors,
        connection,
        subscriptions,
        interpreter,
    );

    let (forum_tx, forum_rx) = mpsc::unbounded_channel();
    let webhook_state = WebhookState::new(
        config.slack.enabled,
        forum_tx,
        config.forum.trimmed_base_url(),
        config.webhook.secret.clone(),
    );

    info!("Bridge is starting...");
    tokio::select! {
        _ = bridge.run(socket_rx, forum_rx) => {}
        result = webhook::serve(&config.webhook.listen, webhook_state) => result?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
