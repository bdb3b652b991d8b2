//! Route — the narrow view of a router location that the caches read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Route metadata flags consulted by access checks and tab tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteMeta {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub order: Option<f64>,
    pub keep_alive: Option<bool>,
    /// Reachable without an entry in the menu tree.
    pub public: bool,
    /// Never shown as a tab.
    pub hidden_tab: bool,
    pub no_tag: bool,
    /// Pinned tab.
    pub affix: bool,
}

/// A resolved router location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteLocation {
    pub path: String,
    pub full_path: String,
    pub query: BTreeMap<String, Value>,
    pub params: BTreeMap<String, Value>,
    pub meta: RouteMeta,
    pub name: Option<String>,
}

impl RouteLocation {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            full_path: path.clone(),
            path,
            ..Self::default()
        }
    }

    /// Add a query parameter and rebuild `full_path`.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self.full_path = render_full_path(&self.path, &self.query);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta.title = Some(title.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn affixed(mut self) -> Self {
        self.meta.affix = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.meta.public = true;
        self
    }

    /// Tab title: explicit meta title, then route name, then path.
    pub fn display_title(&self) -> String {
        self.meta
            .title
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.path.clone())
    }
}

fn render_full_path(path: &str, query: &BTreeMap<String, Value>) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .flat_map(|(k, v)| match v {
            Value::Array(items) => items.iter().map(|i| format!("{k}={}", scalar(i))).collect(),
            Value::Null => vec![k.clone()],
            other => vec![format!("{k}={}", scalar(other))],
        })
        .collect();
    format!("{path}?{}", pairs.join("&"))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
