//! HTTP receiver for the forum's outgoing webhooks.
//!
//! The forum posts one JSON body per event to `/webhooks/forum`, naming the
//! event in the `X-Discourse-Event` header. `post_created` and `topic_created`
//! are turned into [`ForumEvent`]s and handed to the event loop; every other
//! event is acknowledged and ignored. While the bridge is disabled the endpoint
//! answers 404, so the forum's delivery log shows it as dormant.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ForumEvent, Post, Topic};

const EVENT_HEADER: &str = "x-discourse-event";
const SIGNATURE_HEADER: &str = "x-discourse-event-signature";

#[derive(Clone)]
pub struct WebhookState {
    enabled: bool,
    events: mpsc::UnboundedSender<ForumEvent>,
    base_url: String,
    secret: Option<String>,
}

impl WebhookState {
    pub fn new(
        enabled: bool,
        events: mpsc::UnboundedSender<ForumEvent>,
        base_url: &str,
        secret: Option<String>,
    ) -> Self {
        Self {
            enabled,
            events,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/forum", post(receive))
        .with_state(state)
}

/// Serve the webhook router until the process exits.
pub async fn serve(listen: &str, state: WebhookState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind webhook listener to {listen}"))?;
    info!("Forum webhook listening on http://{listen}/webhooks/forum");

    axum::serve(listener, router(state))
        .await
        .context("Webhook server error")
}

async fn health() -> &'static str {
    "ok"
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !state.enabled {
        return StatusCode::NOT_FOUND;
    }

    if let Some(secret) = &state.secret {
        if !signature_matches(secret, &headers, &body) {
            warn!("Rejecting forum webhook with a bad or missing signature");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let Some(event_name) = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };

    let event = match parse_event(event_name, &body, &state.base_url) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!("Ignoring forum event: {event_name}");
            return StatusCode::OK;
        }
        Err(e) => {
            warn!("Malformed {event_name} payload: {e:#}");
            return StatusCode::BAD_REQUEST;
        }
    };

    if state.events.send(event).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

fn signature_matches(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(provided) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
    else {
        return false;
    };
    let Ok(expected) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    post: PostBody,
}

#[derive(Debug, Deserialize)]
struct PostBody {
    id: u64,
    topic_id: u64,
    #[serde(default)]
    topic_slug: Option<String>,
    #[serde(default = "first_post")]
    post_number: u64,
}

fn first_post() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct TopicPayload {
    topic: TopicBody,
}

#[derive(Debug, Deserialize)]
struct TopicBody {
    id: u64,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    category_id: Option<u64>,
}

fn topic_url(base_url: &str, slug: Option<&str>, topic_id: u64) -> String {
    match slug {
        Some(slug) if !slug.is_empty() => format!("{base_url}/t/{slug}/{topic_id}"),
        _ => format!("{base_url}/t/{topic_id}"),
    }
}

/// `Ok(None)` for event names the bridge does not care about.
fn parse_event(name: &str, body: &[u8], base_url: &str) -> Result<Option<ForumEvent>> {
    match name {
        "post_created" => {
            let payload: PostPayload = serde_json::from_slice(body)?;
            let post = payload.post;
            let mut url = topic_url(base_url, post.topic_slug.as_deref(), post.topic_id);
            // The opening post shares the topic URL.
            if post.post_number > 1 {
                url = format!("{url}/{}", post.post_number);
            }
            Ok(Some(ForumEvent::PostCreated(Post {
                id: post.id,
                topic_id: post.topic_id,
                url,
            })))
        }
        "topic_created" => {
            let payload: TopicPayload = serde_json::from_slice(body)?;
            let topic = payload.topic;
            Ok(Some(ForumEvent::TopicCreated(Topic {
                id: topic.id,
                category_id: topic.category_id,
                url: topic_url(base_url, topic.slug.as_deref(), topic.id),
            })))
        }
        _ => Ok(None),
    }
}
