/// What a forum URL path points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Topic { topic_id: u64 },
    /// Category listing; `segment` is either a slug or a numeric ID.
    Category { segment: String },
}

/// Maps a forum URL path (base path already removed) to an entity.
pub trait RouteResolver: Send + Sync {
    fn recognize(&self, path: &str) -> Option<Route>;
}

/// Recognizes the forum's public `/t/...` and `/c/...` URL layouts.
#[derive(Debug, Clone, Default)]
pub struct ForumRoutes;

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

impl ForumRoutes {
    fn topic(segments: &[&str]) -> Option<Route> {
        let id = match segments {
            // t/:topic_id and t/:topic_id/:post_number
            [id] | [id, _] if is_numeric(id) && segments.iter().all(|s| is_numeric(s)) => *id,
            // t/:slug/:topic_id and t/:slug/:topic_id/:post_number
            [_, id] | [_, id, _] if is_numeric(id) => *id,
            _ => return None,
        };
        id.parse().ok().map(|topic_id| Route::Topic { topic_id })
    }

    fn category(segments: &[&str]) -> Option<Route> {
        // Listing filters trail the category path: /c/slug/12/l/latest, /c/slug/none
        let end = segments
            .iter()
            .position(|s| *s == "l")
            .unwrap_or(segments.len());
        let mut path = &segments[..end];
        if let [rest @ .., "none" | "all"] = path {
            path = rest;
        }
        path.last().map(|segment| Route::Category {
            segment: segment.to_string(),
        })
    }
}

impl RouteResolver for ForumRoutes {
    fn recognize(&self, path: &str) -> Option<Route> {
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".json").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.split_first() {
            Some((&"t", rest)) => Self::topic(rest),
            Some((&"c", rest)) => Self::category(rest),
            _ => None,
        }
    }
}
