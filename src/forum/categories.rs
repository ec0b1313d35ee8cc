use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ForumConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: u64,
    pub slug: String,
}

/// Source of the forum's category list.
#[async_trait]
pub trait CategoryDirectory: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>>;
}

/// Resolve a category path segment: slug first, then the segment as an ID.
/// The directory is listed once per call.
pub async fn resolve_category(
    directory: &dyn CategoryDirectory,
    segment: &str,
) -> Result<Option<Category>> {
    let categories = directory.categories().await?;
    if let Some(category) = categories.iter().find(|c| c.slug == segment) {
        return Ok(Some(category.clone()));
    }
    let Ok(id) = segment.parse::<u64>() else {
        return Ok(None);
    };
    Ok(categories.into_iter().find(|c| c.id == id))
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    category_list: CategoryList,
}

#[derive(Debug, Deserialize)]
struct CategoryList {
    categories: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    id: u64,
    slug: String,
    #[serde(default)]
    subcategory_list: Vec<CategoryEntry>,
}

fn flatten(entries: Vec<CategoryEntry>, out: &mut Vec<Category>) {
    for entry in entries {
        out.push(Category {
            id: entry.id,
            slug: entry.slug,
        });
        flatten(entry.subcategory_list, out);
    }
}

/// Category lookups against the forum's `categories.json` endpoint.
pub struct ForumCategories {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_username: Option<String>,
}

impl ForumCategories {
    pub fn new(config: &ForumConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.trimmed_base_url().to_string(),
            api_key: config.api_key.clone(),
            api_username: config.api_username.clone(),
        }
    }

    async fn fetch_all(&self) -> Result<Vec<Category>> {
        let url = format!("{}/categories.json", self.base_url);
        debug!("Fetching forum categories: {}", url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("include_subcategories", "true")]);
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }
        if let Some(username) = &self.api_username {
            request = request.header("Api-Username", username);
        }

        let response = request
            .send()
            .await
            .context("Failed to request forum categories")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Forum categories request failed ({}): {}", status, body);
        }

        let parsed: CategoriesResponse = response
            .json()
            .await
            .context("Failed to parse forum categories")?;

        let mut categories = Vec::new();
        flatten(parsed.category_list.categories, &mut categories);
        Ok(categories)
    }
}

#[async_trait]
impl CategoryDirectory for ForumCategories {
    async fn categories(&self) -> Result<Vec<Category>> {
        self.fetch_all().await
    }
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticCategories {
    categories: Vec<Category>,
}

impl StaticCategories {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }
}

#[async_trait]
impl CategoryDirectory for StaticCategories {
    async fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.categories.clone())
    }
}
