pub mod categories;
pub mod routes;
pub mod webhook;

/// A newly created post.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: u64,
    pub topic_id: u64,
    pub url: String,
}

/// A newly created topic. Topics outside any category have no `category_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub id: u64,
    pub category_id: Option<u64>,
    pub url: String,
}

/// Content-creation events emitted by the forum.
#[derive(Debug, Clone, PartialEq)]
pub enum ForumEvent {
    PostCreated(Post),
    TopicCreated(Topic),
}
