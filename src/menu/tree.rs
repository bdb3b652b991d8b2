//! Menu tree model and normalization.
//!
//! A normalized tree has every level sorted by `order` (missing = 0, stable
//! for ties) and `external` filled in on every node.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?:|mailto:|tel:)").expect("external link pattern"));

/// One node in a menu tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    pub fn new(path: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_children(mut self, children: Vec<MenuItem>) -> Self {
        self.children = children;
        self
    }

    /// Whether this node links outside the application.
    pub fn is_external(&self) -> bool {
        self.external.unwrap_or_else(|| is_external_path(&self.path))
    }
}

/// Absolute URLs (and mail/phone links) leave the application.
pub fn is_external_path(path: &str) -> bool {
    EXTERNAL_LINK.is_match(path)
}

/// Sort every level by `order` and resolve `external` on every node.
pub fn normalize(items: Vec<MenuItem>) -> Vec<MenuItem> {
    let mut items: Vec<MenuItem> = items
        .into_iter()
        .map(|mut item| {
            item.external = Some(item.is_external());
            item.children = normalize(std::mem::take(&mut item.children));
            item
        })
        .collect();
    items.sort_by(|a, b| a.order.unwrap_or(0.0).total_cmp(&b.order.unwrap_or(0.0)));
    items
}

/// Every internal path in the tree, depth-first in tree order.
pub fn internal_paths(items: &[MenuItem]) -> Vec<&str> {
    let mut out = Vec::new();
    collect_paths(items, &mut out);
    out
}

fn collect_paths<'a>(items: &'a [MenuItem], out: &mut Vec<&'a str>) {
    for item in items {
        if !item.is_external() && !item.path.is_empty() {
            out.push(&item.path);
        }
        collect_paths(&item.children, out);
    }
}

/// Access allow-list: internal tree paths plus the public whitelist.
pub fn allowed_paths(items: &[MenuItem], whitelist: &[String]) -> HashSet<String> {
    internal_paths(items)
        .into_iter()
        .map(str::to_string)
        .chain(whitelist.iter().cloned())
        .collect()
}
