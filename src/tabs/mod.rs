//! Tab sessions — per-system open tabs with an active pointer.
//!
//! Invariants kept after every mutation:
//! - affixed tabs form a contiguous prefix, otherwise insertion order
//! - `active_key` is empty or names an existing tab
//!
//! State lives in the volatile tier only, under the unscoped key
//! `tabs-state:{code}`, wrapped in a versioned snapshot. Anything that fails validation on hydration is
//! purged and treated as an empty session.

pub mod key;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::route::RouteLocation;
use crate::storage::{KvStore, Tier, WriteOptions};

pub const TABS_STATE_PREFIX: &str = "tabs-state:";
pub const TABS_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_REDIRECT_PREFIX: &str = "/redirect";

pub fn tabs_key(code: &str) -> String {
    format!("{TABS_STATE_PREFIX}{code}")
}

/// One open tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabItem {
    pub key: String,
    pub full_path: String,
    pub path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub affix: bool,
    #[serde(default)]
    pub keep_alive: bool,
}

impl TabItem {
    pub fn from_route(route: &RouteLocation) -> Self {
        Self {
            key: key::route_tab_key(route),
            full_path: route.full_path.clone(),
            path: route.path.clone(),
            title: route.display_title(),
            name: route.name.clone(),
            affix: route.meta.affix,
            keep_alive: route.meta.keep_alive.unwrap_or(false),
        }
    }
}

/// Tabs and active pointer for one system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabSessionState {
    pub tabs: Vec<TabItem>,
    pub active_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabSnapshot {
    version: u32,
    tabs: Vec<TabItem>,
    active_key: String,
}

impl TabSnapshot {
    fn validate(self) -> Result<TabSessionState, String> {
        if self.version != TABS_SCHEMA_VERSION {
            return Err(format!("unsupported version {}", self.version));
        }
        let mut seen = HashSet::new();
        for tab in &self.tabs {
            if tab.key.is_empty() {
                return Err("tab with empty key".into());
            }
            if !seen.insert(tab.key.as_str()) {
                return Err(format!("duplicate tab key {}", tab.key));
            }
        }
        Ok(TabSessionState {
            tabs: self.tabs,
            active_key: self.active_key,
        })
    }
}

/// Move affixed tabs to the front, keeping relative order on both sides.
pub fn normalize_affix(tabs: &mut Vec<TabItem>) {
    let (mut pinned, rest): (Vec<TabItem>, Vec<TabItem>) =
        tabs.drain(..).partition(|t| t.affix);
    pinned.extend(rest);
    *tabs = pinned;
}

/// Open-tab tracker across systems. Operations act on the current system.
pub struct TabSessions {
    store: KvStore,
    redirect_prefix: String,
    current: String,
    sessions: HashMap<String, TabSessionState>,
}

impl TabSessions {
    pub fn new(store: KvStore, current: &str) -> Self {
        let mut sessions = Self {
            store,
            redirect_prefix: DEFAULT_REDIRECT_PREFIX.into(),
            current: String::new(),
            sessions: HashMap::new(),
        };
        sessions.set_current_system(current);
        sessions
    }

    pub fn with_redirect_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.redirect_prefix = prefix.into();
        self
    }

    pub fn current_system(&self) -> &str {
        &self.current
    }

    /// Point operations at `code`, hydrating its session on first use.
    pub fn set_current_system(&mut self, code: &str) {
        self.current = code.to_string();
        if !self.sessions.contains_key(code) {
            let state = self.hydrate(code);
            self.sessions.insert(code.to_string(), state);
        }
    }

    // ── Getters ──

    pub fn tabs(&self) -> &[TabItem] {
        self.sessions
            .get(&self.current)
            .map(|s| s.tabs.as_slice())
            .unwrap_or(&[])
    }

    pub fn active_key(&self) -> &str {
        self.sessions
            .get(&self.current)
            .map(|s| s.active_key.as_str())
            .unwrap_or("")
    }

    pub fn active_tab(&self) -> Option<&TabItem> {
        let active = self.active_key();
        self.tabs().iter().find(|t| t.key == active)
    }

    pub fn state(&self) -> TabSessionState {
        self.sessions.get(&self.current).cloned().unwrap_or_default()
    }

    // ── Operations ──

    /// Open or activate the tab for `route`. Returns its key, or `None` when
    /// the route is not tab-worthy.
    pub fn open_by_route(&mut self, route: &RouteLocation) -> Option<String> {
        if route.meta.hidden_tab || route.meta.no_tag || self.is_redirect(&route.path) {
            return None;
        }
        let incoming = TabItem::from_route(route);
        let key = incoming.key.clone();

        let state = self.state_mut();
        if let Some(tab) = state.tabs.iter_mut().find(|t| t.key == key) {
            tab.title = incoming.title;
            tab.name = incoming.name;
            tab.affix = incoming.affix;
            tab.keep_alive = incoming.keep_alive;
        } else {
            let insert_at = state
                .tabs
                .iter()
                .position(|t| t.key == state.active_key)
                .map_or(state.tabs.len(), |i| i + 1);
            state.tabs.insert(insert_at, incoming);
        }
        state.active_key = key.clone();
        normalize_affix(&mut state.tabs);

        self.persist();
        Some(key)
    }

    /// Close one tab. Affixed tabs are never closed. If the active tab goes,
    /// the tab that slides into its index wins, else its left neighbour.
    /// Returns the full path of the newly active tab.
    pub fn close(&mut self, key_or_path: &str) -> Option<String> {
        let state = self.state_mut();
        let idx = find_index(&state.tabs, key_or_path)?;
        if state.tabs[idx].affix {
            return None;
        }
        let removed = state.tabs.remove(idx);
        let mut navigate = None;
        if removed.key == state.active_key {
            let next = state
                .tabs
                .get(idx)
                .or_else(|| idx.checked_sub(1).and_then(|i| state.tabs.get(i)));
            match next {
                Some(tab) => {
                    state.active_key = tab.key.clone();
                    navigate = Some(tab.full_path.clone());
                }
                None => state.active_key.clear(),
            }
        }
        self.persist();
        navigate
    }

    /// Keep affixed tabs and the target; activate the target.
    pub fn close_others(&mut self, key_or_path: &str) -> Option<String> {
        let state = self.state_mut();
        let idx = find_index(&state.tabs, key_or_path)?;
        let target = state.tabs[idx].clone();
        state.tabs.retain(|t| t.affix || t.key == target.key);
        normalize_affix(&mut state.tabs);
        let navigate = activate(state, &target);
        self.persist();
        navigate
    }

    /// Drop non-affixed tabs left of the target; the target survives.
    pub fn close_left(&mut self, key_or_path: &str) -> Option<String> {
        self.close_side(key_or_path, |i, idx| i >= idx)
    }

    /// Drop non-affixed tabs right of the target; the target survives.
    pub fn close_right(&mut self, key_or_path: &str) -> Option<String> {
        self.close_side(key_or_path, |i, idx| i <= idx)
    }

    fn close_side<F>(&mut self, key_or_path: &str, keep: F) -> Option<String>
    where
        F: Fn(usize, usize) -> bool,
    {
        let state = self.state_mut();
        let idx = find_index(&state.tabs, key_or_path)?;
        let target = state.tabs[idx].clone();
        let tabs = std::mem::take(&mut state.tabs);
        state.tabs = tabs
            .into_iter()
            .enumerate()
            .filter(|(i, t)| t.affix || keep(*i, idx))
            .map(|(_, t)| t)
            .collect();
        normalize_affix(&mut state.tabs);

        let active_survived = state.tabs.iter().any(|t| t.key == state.active_key);
        let navigate = if active_survived {
            None
        } else {
            activate(state, &target)
        };
        self.persist();
        navigate
    }

    /// Keep only affixed tabs and activate the first. Returns its full path.
    pub fn close_all(&mut self) -> Option<String> {
        let state = self.state_mut();
        state.tabs.retain(|t| t.affix);
        let first = state.tabs.first().map(|t| (t.key.clone(), t.full_path.clone()));
        let navigate = match first {
            Some((key, full_path)) => {
                state.active_key = key;
                Some(full_path)
            }
            None => {
                state.active_key.clear();
                None
            }
        };
        self.persist();
        navigate
    }

    /// Rename a tab in place. Returns false when no tab matched.
    pub fn update_title(&mut self, key_or_path: &str, title: &str) -> bool {
        let state = self.state_mut();
        let Some(idx) = find_index(&state.tabs, key_or_path) else {
            return false;
        };
        state.tabs[idx].title = title.to_string();
        self.persist();
        true
    }

    /// Forget every session, in memory and in the volatile tier.
    pub fn reset(&mut self) {
        self.sessions.clear();
        let removed = self
            .store
            .remove_by_prefix(&[TABS_STATE_PREFIX], Tier::Volatile);
        debug!(removed, "tab sessions reset");
        self.sessions
            .insert(self.current.clone(), TabSessionState::default());
    }

    // ── Internal helpers ──

    fn is_redirect(&self, path: &str) -> bool {
        let prefix = self.redirect_prefix.as_str();
        !prefix.is_empty()
            && (path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/')))
    }

    fn state_mut(&mut self) -> &mut TabSessionState {
        if !self.sessions.contains_key(&self.current) {
            let state = self.hydrate(&self.current);
            self.sessions.insert(self.current.clone(), state);
        }
        self.sessions.entry(self.current.clone()).or_default()
    }

    fn hydrate(&self, code: &str) -> TabSessionState {
        let base = tabs_key(code);
        let Some(raw) = self.store.read(&base, &[Tier::Volatile]) else {
            return TabSessionState::default();
        };
        let parsed = serde_json::from_str::<TabSnapshot>(&raw)
            .map_err(|e| e.to_string())
            .and_then(TabSnapshot::validate);
        match parsed {
            Ok(mut state) => {
                normalize_affix(&mut state.tabs);
                if !state.tabs.iter().any(|t| t.key == state.active_key) {
                    state.active_key = state
                        .tabs
                        .first()
                        .map(|t| t.key.clone())
                        .unwrap_or_default();
                }
                debug!(system = code, tabs = state.tabs.len(), "hydrated tab session");
                state
            }
            Err(reason) => {
                warn!(system = code, %reason, "purging invalid tab session");
                self.store.remove(&base, &[Tier::Volatile]);
                TabSessionState::default()
            }
        }
    }

    fn persist(&self) {
        let Some(state) = self.sessions.get(&self.current) else {
            return;
        };
        let snapshot = TabSnapshot {
            version: TABS_SCHEMA_VERSION,
            tabs: state.tabs.clone(),
            active_key: state.active_key.clone(),
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                self.store
                    .write(&tabs_key(&self.current), &json, WriteOptions::volatile());
            }
            Err(e) => warn!(error = %e, "failed to serialize tab session"),
        }
    }
}

/// Match by key first, then by full path or path.
fn find_index(tabs: &[TabItem], key_or_path: &str) -> Option<usize> {
    tabs.iter()
        .position(|t| t.key == key_or_path)
        .or_else(|| {
            tabs.iter()
                .position(|t| t.full_path == key_or_path || t.path == key_or_path)
        })
}

/// Make `target` active. Returns its full path if the active tab changed.
fn activate(state: &mut TabSessionState, target: &TabItem) -> Option<String> {
    if state.active_key == target.key {
        return None;
    }
    state.active_key = target.key.clone();
    Some(target.full_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions() -> TabSessions {
        TabSessions::new(KvStore::in_memory(), "A")
    }

    fn home() -> RouteLocation {
        RouteLocation::new("/home").with_title("Home").affixed()
    }

    fn paths(tabs: &TabSessions) -> Vec<&str> {
        tabs.tabs().iter().map(|t| t.path.as_str()).collect()
    }

    fn active_path(tabs: &TabSessions) -> Option<&str> {
        tabs.active_tab().map(|t| t.path.as_str())
    }

    /// [home(affix), ...rest] with `active` opened last-but-activated.
    fn seeded(rest: &[&str], active: &str) -> TabSessions {
        let mut tabs = sessions();
        tabs.open_by_route(&home());
        for path in rest {
            tabs.open_by_route(&RouteLocation::new(*path));
        }
        tabs.open_by_route(&RouteLocation::new(active));
        tabs
    }

    #[test]
    fn open_inserts_right_of_active() {
        let mut tabs = seeded(&["/a", "/b"], "/a");
        assert_eq!(paths(&tabs), ["/home", "/a", "/b"]);

        tabs.open_by_route(&RouteLocation::new("/c"));
        assert_eq!(paths(&tabs), ["/home", "/a", "/c", "/b"]);
        assert_eq!(active_path(&tabs), Some("/c"));
    }

    #[test]
    fn reopen_updates_in_place() {
        let mut tabs = seeded(&["/a", "/b"], "/b");
        let key = tabs
            .open_by_route(&RouteLocation::new("/a").with_title("Renamed"))
            .unwrap();
        assert_eq!(paths(&tabs), ["/home", "/a", "/b"]);
        assert_eq!(tabs.active_key(), key);
        assert_eq!(tabs.active_tab().unwrap().title, "Renamed");
    }

    #[test]
    fn reopen_with_affix_moves_to_front() {
        let mut tabs = seeded(&["/a", "/b"], "/b");
        tabs.open_by_route(&RouteLocation::new("/b").affixed());
        assert_eq!(paths(&tabs), ["/home", "/b", "/a"]);
    }

    #[test]
    fn hidden_and_redirect_routes_are_ignored() {
        let mut tabs = sessions();
        let mut hidden = RouteLocation::new("/secret");
        hidden.meta.hidden_tab = true;
        let mut no_tag = RouteLocation::new("/quiet");
        no_tag.meta.no_tag = true;

        assert_eq!(tabs.open_by_route(&hidden), None);
        assert_eq!(tabs.open_by_route(&no_tag), None);
        assert_eq!(tabs.open_by_route(&RouteLocation::new("/redirect/a")), None);
        assert_eq!(tabs.open_by_route(&RouteLocation::new("/redirect")), None);
        assert!(tabs.open_by_route(&RouteLocation::new("/redirects")).is_some());
        assert_eq!(tabs.tabs().len(), 1);
    }

    #[test]
    fn query_variants_are_distinct_tabs() {
        let mut tabs = sessions();
        tabs.open_by_route(&RouteLocation::new("/orders").with_query("id", "1"));
        tabs.open_by_route(&RouteLocation::new("/orders").with_query("id", "2"));
        tabs.open_by_route(&RouteLocation::new("/orders").with_query("id", "1"));
        assert_eq!(tabs.tabs().len(), 2);
        assert_eq!(tabs.active_tab().unwrap().full_path, "/orders?id=1");
    }

    #[test]
    fn close_active_prefers_right_neighbour() {
        let mut tabs = seeded(&["/a", "/b", "/c"], "/b");
        let navigate = tabs.close("/b");
        assert_eq!(paths(&tabs), ["/home", "/a", "/c"]);
        assert_eq!(active_path(&tabs), Some("/c"));
        assert_eq!(navigate.as_deref(), Some("/c"));
    }

    #[test]
    fn close_last_active_falls_back_left() {
        let mut tabs = seeded(&["/a", "/b"], "/b");
        assert_eq!(tabs.close("/b").as_deref(), Some("/a"));
        assert_eq!(active_path(&tabs), Some("/a"));
    }

    #[test]
    fn close_only_tab_leaves_active_empty() {
        let mut tabs = sessions();
        tabs.open_by_route(&RouteLocation::new("/a"));
        assert_eq!(tabs.close("/a"), None);
        assert!(tabs.tabs().is_empty());
        assert_eq!(tabs.active_key(), "");
    }

    #[test]
    fn close_inactive_keeps_active() {
        let mut tabs = seeded(&["/a", "/b"], "/b");
        assert_eq!(tabs.close("/a"), None);
        assert_eq!(active_path(&tabs), Some("/b"));
    }

    #[test]
    fn affixed_tab_cannot_be_closed() {
        let mut tabs = seeded(&["/a"], "/home");
        assert_eq!(tabs.close("/home"), None);
        assert_eq!(paths(&tabs), ["/home", "/a"]);
    }

    #[test]
    fn close_others_keeps_affix_and_target() {
        let mut tabs = seeded(&["/a", "/b", "/c"], "/a");
        let navigate = tabs.close_others("/b");
        assert_eq!(paths(&tabs), ["/home", "/b"]);
        assert_eq!(active_path(&tabs), Some("/b"));
        assert_eq!(navigate.as_deref(), Some("/b"));
    }

    #[test]
    fn close_left_keeps_target_and_right() {
        let mut tabs = seeded(&["/a", "/b", "/c"], "/a");
        let navigate = tabs.close_left("/b");
        assert_eq!(paths(&tabs), ["/home", "/b", "/c"]);
        assert_eq!(active_path(&tabs), Some("/b"));
        assert_eq!(navigate.as_deref(), Some("/b"));
    }

    #[test]
    fn close_right_keeps_target_and_left() {
        let mut tabs = seeded(&["/a", "/b", "/c"], "/a");
        let navigate = tabs.close_right("/b");
        assert_eq!(paths(&tabs), ["/home", "/a", "/b"]);
        assert_eq!(active_path(&tabs), Some("/a"));
        assert_eq!(navigate, None);
    }

    #[test]
    fn close_all_leaves_affixed_in_order() {
        let mut tabs = sessions();
        tabs.open_by_route(&home());
        tabs.open_by_route(&RouteLocation::new("/a"));
        tabs.open_by_route(&RouteLocation::new("/dash").affixed());
        tabs.open_by_route(&RouteLocation::new("/b"));

        assert_eq!(tabs.close_all().as_deref(), Some("/home"));
        assert_eq!(paths(&tabs), ["/home", "/dash"]);
        assert_eq!(active_path(&tabs), Some("/home"));
    }

    #[test]
    fn affix_prefix_holds_across_operations() {
        let mut tabs = sessions();
        tabs.open_by_route(&RouteLocation::new("/a"));
        tabs.open_by_route(&home());
        tabs.open_by_route(&RouteLocation::new("/b"));
        tabs.open_by_route(&RouteLocation::new("/pinned").affixed());
        tabs.close("/a");
        tabs.open_by_route(&RouteLocation::new("/c"));
        tabs.close_left("/c");

        let first_unpinned = tabs.tabs().iter().position(|t| !t.affix).unwrap();
        assert!(tabs.tabs()[first_unpinned..].iter().all(|t| !t.affix));
        assert_eq!(paths(&tabs)[..2], ["/home", "/pinned"]);
    }

    #[test]
    fn update_title_in_place() {
        let mut tabs = seeded(&["/a", "/b"], "/b");
        assert!(tabs.update_title("/a", "Alpha"));
        assert!(!tabs.update_title("/missing", "x"));
        assert_eq!(tabs.tabs()[1].title, "Alpha");
        assert_eq!(paths(&tabs), ["/home", "/a", "/b"]);
    }

    #[test]
    fn session_restores_from_volatile_tier() {
        let storage = KvStore::in_memory();
        {
            let mut tabs = TabSessions::new(storage.clone(), "A");
            tabs.open_by_route(&home());
            tabs.open_by_route(&RouteLocation::new("/a"));
        }
        let tabs = TabSessions::new(storage.clone(), "A");
        assert_eq!(paths(&tabs), ["/home", "/a"]);
        assert_eq!(active_path(&tabs), Some("/a"));
        assert!(storage.read(&tabs_key("A"), &[Tier::Persistent]).is_none());
    }

    #[test]
    fn systems_are_independent() {
        let mut tabs = sessions();
        tabs.open_by_route(&RouteLocation::new("/a"));
        tabs.set_current_system("B");
        assert!(tabs.tabs().is_empty());
        tabs.open_by_route(&RouteLocation::new("/b"));
        tabs.set_current_system("A");
        assert_eq!(paths(&tabs), ["/a"]);
    }

    #[test]
    fn stale_version_is_purged() {
        let storage = KvStore::in_memory();
        storage.write(
            &tabs_key("A"),
            r#"{"version":0,"tabs":[],"activeKey":""}"#,
            WriteOptions::volatile(),
        );
        let tabs = TabSessions::new(storage.clone(), "A");
        assert!(tabs.tabs().is_empty());
        assert!(storage.read(&tabs_key("A"), &[Tier::Volatile]).is_none());
    }

    #[test]
    fn dangling_active_key_is_repaired() {
        let storage = KvStore::in_memory();
        let json = r#"{"version":1,"tabs":[
            {"key":"tab-1","fullPath":"/a","path":"/a","title":"A"},
            {"key":"tab-2","fullPath":"/h","path":"/h","title":"H","affix":true}
        ],"activeKey":"tab-9"}"#;
        storage.write(&tabs_key("A"), json, WriteOptions::volatile());
        let tabs = TabSessions::new(storage, "A");
        assert_eq!(paths(&tabs), ["/h", "/a"]);
        assert_eq!(tabs.active_key(), "tab-2");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let storage = KvStore::in_memory();
        let json = r#"{"version":1,"tabs":[
            {"key":"tab-1","fullPath":"/a","path":"/a","title":"A"},
            {"key":"tab-1","fullPath":"/b","path":"/b","title":"B"}
        ],"activeKey":"tab-1"}"#;
        storage.write(&tabs_key("A"), json, WriteOptions::volatile());
        let tabs = TabSessions::new(storage, "A");
        assert!(tabs.tabs().is_empty());
    }

    #[test]
    fn reset_clears_all_systems() {
        let storage = KvStore::in_memory();
        let mut tabs = TabSessions::new(storage.clone(), "A");
        tabs.open_by_route(&RouteLocation::new("/a"));
        tabs.set_current_system("B");
        tabs.open_by_route(&RouteLocation::new("/b"));
        tabs.reset();
        assert!(tabs.tabs().is_empty());
        assert!(storage.keys(Tier::Volatile).is_empty());
    }
}
