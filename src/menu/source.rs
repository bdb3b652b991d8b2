//! Menu sources — where menu trees come from.
//!
//! A source may serve a single tree or, preferably, every system's tree in one
//! call. Sources without the multi-system capability report
//! `SourceError::Unsupported` and the cache falls back to the single fetch.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::tree::MenuItem;

/// One system's payload from a multi-system fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuSystem {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub menus: Vec<MenuItem>,
}

/// Errors from menu sources.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("capability unavailable: {0}")]
    Unsupported(&'static str),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidPayload(e.to_string())
        } else {
            Self::Fetch(e.to_string())
        }
    }
}

/// Supplier of menu trees.
#[async_trait]
pub trait MenuSource: Send + Sync {
    /// The tree for the single (implicit) system.
    async fn fetch_menu_tree(&self) -> Result<Vec<MenuItem>, SourceError>;

    /// Every system with its tree.
    async fn fetch_menu_systems(&self) -> Result<Vec<MenuSystem>, SourceError> {
        Err(SourceError::Unsupported("fetch_menu_systems"))
    }
}

/// Source over fixed, in-process trees.
#[derive(Debug, Clone, Default)]
pub struct StaticMenuSource {
    tree: Vec<MenuItem>,
    systems: Option<Vec<MenuSystem>>,
}

impl StaticMenuSource {
    pub fn single(tree: Vec<MenuItem>) -> Self {
        Self {
            tree,
            systems: None,
        }
    }

    pub fn systems(systems: Vec<MenuSystem>) -> Self {
        Self {
            tree: Vec::new(),
            systems: Some(systems),
        }
    }
}

#[async_trait]
impl MenuSource for StaticMenuSource {
    async fn fetch_menu_tree(&self) -> Result<Vec<MenuItem>, SourceError> {
        Ok(self.tree.clone())
    }

    async fn fetch_menu_systems(&self) -> Result<Vec<MenuSystem>, SourceError> {
        self.systems
            .clone()
            .ok_or(SourceError::Unsupported("fetch_menu_systems"))
    }
}

/// HTTP source: `GET {base}/menus` and `GET {base}/menu-systems`.
///
/// A 404 from the systems endpoint means the backend predates multi-system
/// menus and is reported as `Unsupported`.
#[derive(Debug, Clone)]
pub struct HttpMenuSource {
    http: Client,
    base_url: String,
    bearer: Option<String>,
}

impl HttpMenuSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer: None,
        }
    }

    /// Attach an already-exchanged access token.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn menus_url(&self) -> String {
        format!("{}/menus", self.base_url)
    }

    pub fn systems_url(&self) -> String {
        format!("{}/menu-systems", self.base_url)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, SourceError> {
        let mut request = self.http.get(url).header("accept", "application/json");
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SourceError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MenuSource for HttpMenuSource {
    async fn fetch_menu_tree(&self) -> Result<Vec<MenuItem>, SourceError> {
        let response = Self::check(self.get(&self.menus_url()).await?).await?;
        Ok(response.json().await?)
    }

    async fn fetch_menu_systems(&self) -> Result<Vec<MenuSystem>, SourceError> {
        let response = self.get(&self.systems_url()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Unsupported("fetch_menu_systems"));
        }
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_source_lacks_systems() {
        let source = StaticMenuSource::single(vec![MenuItem::new("/a", "A")]);
        assert!(matches!(
            source.fetch_menu_systems().await,
            Err(SourceError::Unsupported(_))
        ));
        assert_eq!(source.fetch_menu_tree().await.unwrap().len(), 1);
    }

    #[test]
    fn http_urls_trim_trailing_slash() {
        let source = HttpMenuSource::new("https://admin.example.com/api/");
        assert_eq!(source.menus_url(), "https://admin.example.com/api/menus");
        assert_eq!(source.systems_url(), "https://admin.example.com/api/menu-systems");
    }

    #[test]
    fn menu_system_payload_shape() {
        let json = r#"[{"code":"crm","name":"CRM","menus":[{"path":"/leads","title":"Leads","order":1}]}]"#;
        let systems: Vec<MenuSystem> = serde_json::from_str(json).unwrap();
        assert_eq!(systems[0].code, "crm");
        assert_eq!(systems[0].menus[0].order, Some(1.0));
    }
}
