//! Menu cache — per-system menu trees, access allow-lists, and the path index.
//!
//! Trees are normalized on entry, persisted under `menu-tree:{code}` (capped,
//! never empty), and hydrated lazily from storage. `load_menus` is the only
//! async entry point; overlapping calls share one fetch.

pub mod index;
pub mod source;
pub mod tree;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::route::RouteLocation;
use crate::storage::backend::lock;
use crate::storage::eviction::{EvictionClass, EvictionLadder};
use crate::storage::namespace::Namespaced;
use crate::storage::{byte_len, Tier, WriteOptions, DEFAULT_READ_ORDER};

use index::PathIndex;
use source::{MenuSource, MenuSystem, SourceError};
use tree::MenuItem;

pub const MENU_TREE_PREFIX: &str = "menu-tree:";
pub const PATH_INDEX_KEY: &str = "menu-path-index";
pub const SYSTEMS_KEY: &str = "menu-systems";
pub const CURRENT_SYSTEM_KEY: &str = "menu-current-system";

pub const DEFAULT_MENU_TREE_CAP: usize = 1024 * 1024;
pub const DEFAULT_PATH_INDEX_CAP: usize = 256 * 1024;

/// Routes reachable regardless of the menu tree.
pub const BASE_WHITELIST: [&str; 5] = ["/", "/login", "/sso", "/403", "/404"];

pub fn tree_key(code: &str) -> String {
    format!("{MENU_TREE_PREFIX}{code}")
}

/// A tenant-like partition of menus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

impl System {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// How `load_menus` obtains trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Wrap the configured static tree as one system.
    Static,
    /// Ask the menu source, preferring the multi-system fetch.
    #[default]
    Dynamic,
}

/// Which path a load actually took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchedVia {
    Static,
    Systems,
    Single,
}

/// Result of a `load_menus` cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub systems: Vec<System>,
    pub current: Option<String>,
    pub fetched_via: FetchedVia,
    /// False when a `reset` landed while the fetch was in flight.
    pub committed: bool,
}

/// Errors surfaced by the menu cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MenuError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing capability: {0}")]
    MissingCapability(&'static str),

    #[error("menu source error: {0}")]
    Source(#[from] SourceError),

    #[error("unknown system: {0}")]
    UnknownSystem(String),
}

/// Knobs for the menu cache, usually derived from `NavConfig`.
#[derive(Debug, Clone)]
pub struct MenuSettings {
    pub mode: LoadMode,
    pub default_system: Option<String>,
    pub static_menus: Option<Vec<MenuItem>>,
    /// Identity used when a single tree is wrapped as a system.
    pub static_system: System,
    pub menu_tree_cap: usize,
    pub path_index_cap: usize,
    pub public_paths: Vec<String>,
}

impl Default for MenuSettings {
    fn default() -> Self {
        Self {
            mode: LoadMode::Dynamic,
            default_system: None,
            static_menus: None,
            static_system: System::new("default", "Default"),
            menu_tree_cap: DEFAULT_MENU_TREE_CAP,
            path_index_cap: DEFAULT_PATH_INDEX_CAP,
            public_paths: BASE_WHITELIST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct MenuState {
    systems: Vec<System>,
    current: Option<String>,
    trees: BTreeMap<String, Vec<MenuItem>>,
    allowed: HashMap<String, HashSet<String>>,
    loaded: HashSet<String>,
    index: PathIndex,
    index_hydrated: bool,
}

type LoadCell = Arc<OnceCell<Result<LoadSummary, MenuError>>>;

/// The menu cache. Construct once and share by reference (or `Arc`).
pub struct MenuCache {
    storage: Namespaced,
    ladder: EvictionLadder,
    source: Option<Arc<dyn MenuSource>>,
    settings: MenuSettings,
    state: Mutex<MenuState>,
    in_flight: Mutex<Option<LoadCell>>,
    /// Bumped by `reset`; a load that started under an older epoch is discarded.
    epoch: AtomicU64,
}

impl MenuCache {
    /// Create the cache and restore the systems registry from storage.
    pub fn new(
        storage: Namespaced,
        settings: MenuSettings,
        source: Option<Arc<dyn MenuSource>>,
    ) -> Self {
        let cache = Self {
            storage,
            ladder: EvictionLadder::default(),
            source,
            settings,
            state: Mutex::new(MenuState::default()),
            in_flight: Mutex::new(None),
            epoch: AtomicU64::new(0),
        };
        cache.hydrate_registry();
        cache
    }

    pub fn with_ladder(mut self, ladder: EvictionLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn settings(&self) -> &MenuSettings {
        &self.settings
    }

    // ── Trees ──

    /// Install a tree for `code`. Unknown systems are registered, and the
    /// first system installed becomes current.
    pub fn set_menus_for_system(&self, code: &str, raw: Vec<MenuItem>, persist: bool) {
        let items = tree::normalize(raw);
        let mut state = lock(&self.state);
        if !state.systems.iter().any(|s| s.code == code) {
            state.systems.push(System::new(code, code));
        }
        if state.current.is_none() {
            state.current = Some(code.to_string());
        }
        self.apply_tree(&mut state, code, items, persist);
        self.refresh_index(&mut state, persist);
        if persist {
            self.persist_registry(&state);
        }
    }

    /// Normalized tree for `code`, hydrating from storage on first access.
    pub fn menus_for_system(&self, code: &str) -> Option<Vec<MenuItem>> {
        let mut state = lock(&self.state);
        self.ensure_hydrated(&mut state, code);
        state.trees.get(code).cloned()
    }

    /// Tree of the current system.
    pub fn current_menus(&self) -> Vec<MenuItem> {
        let mut state = lock(&self.state);
        let Some(code) = state.current.clone() else {
            return Vec::new();
        };
        self.ensure_hydrated(&mut state, &code);
        state.trees.get(&code).cloned().unwrap_or_default()
    }

    pub fn is_loaded(&self, code: &str) -> bool {
        lock(&self.state).loaded.contains(code)
    }

    // ── Access control ──

    /// Membership test against the current system's allow-list. With no
    /// tree available only the public whitelist passes.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut state = lock(&self.state);
        if let Some(code) = state.current.clone() {
            self.ensure_hydrated(&mut state, &code);
            if let Some(allowed) = state.allowed.get(&code) {
                return allowed.contains(path);
            }
        }
        self.settings.public_paths.iter().any(|p| p == path)
    }

    /// Public routes pass; everything else goes through `is_allowed`.
    pub fn can_access(&self, route: &RouteLocation) -> bool {
        route.meta.public || self.is_allowed(&route.path)
    }

    // ── Path index ──

    /// Which system owns `path`. Misses re-scan the in-memory trees before
    /// giving up.
    pub fn resolve_system_by_menu_key(&self, path: &str) -> Option<String> {
        let mut state = lock(&self.state);
        if !state.index_hydrated {
            self.hydrate_index(&mut state);
        }
        if let Some(code) = state.index.get(path) {
            return Some(code.to_string());
        }

        let owner = state
            .trees
            .iter()
            .filter(|(code, _)| state.systems.iter().any(|s| &s.code == *code))
            .find(|(_, items)| tree::internal_paths(items).contains(&path))
            .map(|(code, _)| code.clone())?;
        debug!(path, system = %owner, "path index miss resolved by re-scan");
        state.index.insert(path, &owner);
        Some(owner)
    }

    pub fn path_index_len(&self) -> usize {
        let mut state = lock(&self.state);
        if !state.index_hydrated {
            self.hydrate_index(&mut state);
        }
        state.index.len()
    }

    // ── Systems ──

    pub fn systems(&self) -> Vec<System> {
        lock(&self.state).systems.clone()
    }

    pub fn current_system(&self) -> Option<String> {
        lock(&self.state).current.clone()
    }

    /// Switch the current system. Other systems' state is left untouched.
    pub fn set_current_system(&self, code: &str) -> Result<(), MenuError> {
        let mut state = lock(&self.state);
        if !state.systems.iter().any(|s| s.code == code) {
            return Err(MenuError::UnknownSystem(code.to_string()));
        }
        state.current = Some(code.to_string());
        self.persist_registry(&state);
        Ok(())
    }

    /// Byte size of every persisted tree, by system code.
    pub fn persisted_tree_sizes(&self) -> Vec<(String, usize)> {
        self.storage
            .keys_with_prefix(MENU_TREE_PREFIX, Tier::Persistent)
            .into_iter()
            .filter_map(|base| {
                let raw = self
                    .storage
                    .read_with_legacy_fallback(&base, &[Tier::Persistent])?;
                let code = base.strip_prefix(MENU_TREE_PREFIX)?.to_string();
                Some((code, byte_len(&raw)))
            })
            .collect()
    }

    // ── Loading ──

    /// Fetch menus and swap them in. Calls that overlap an in-flight load
    /// attach to it and receive the same result.
    pub async fn load_menus(&self, mode: Option<LoadMode>) -> Result<LoadSummary, MenuError> {
        let cell = lock(&self.in_flight)
            .get_or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(|| self.run_load(mode)).await.clone();

        let mut slot = lock(&self.in_flight);
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            *slot = None;
        }
        result
    }

    async fn run_load(&self, mode: Option<LoadMode>) -> Result<LoadSummary, MenuError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mode = mode.unwrap_or(self.settings.mode);

        let (payload, via) = match mode {
            LoadMode::Static => {
                let menus = self.settings.static_menus.clone().ok_or_else(|| {
                    MenuError::Config("static mode requires static_menus".into())
                })?;
                (vec![self.wrap_single(menus)], FetchedVia::Static)
            }
            LoadMode::Dynamic => {
                let source = self
                    .source
                    .as_ref()
                    .ok_or(MenuError::MissingCapability("menu source"))?;
                match source.fetch_menu_systems().await {
                    Ok(systems) => (systems, FetchedVia::Systems),
                    Err(SourceError::Unsupported(_)) => {
                        debug!("multi-system fetch unavailable, falling back to single tree");
                        let menus = source.fetch_menu_tree().await?;
                        (vec![self.wrap_single(menus)], FetchedVia::Single)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!("discarding menu load invalidated by reset");
            return Ok(LoadSummary {
                systems: Vec::new(),
                current: None,
                fetched_via: via,
                committed: false,
            });
        }

        Ok(self.commit(payload, via))
    }

    fn wrap_single(&self, menus: Vec<MenuItem>) -> MenuSystem {
        MenuSystem {
            code: self.settings.static_system.code.clone(),
            name: self.settings.static_system.name.clone(),
            menus,
        }
    }

    /// Swap a fetched payload into memory and storage.
    fn commit(&self, payload: Vec<MenuSystem>, via: FetchedVia) -> LoadSummary {
        let mut seen = HashSet::new();
        let incoming: Vec<(System, Vec<MenuItem>)> = payload
            .into_iter()
            .filter(|s| {
                if s.code.is_empty() {
                    warn!("skipping menu system with empty code");
                    return false;
                }
                seen.insert(s.code.clone())
            })
            .map(|s| {
                let name = if s.name.is_empty() { s.code.clone() } else { s.name };
                (System::new(s.code, name), tree::normalize(s.menus))
            })
            .collect();

        let mut state = lock(&self.state);

        if via == FetchedVia::Systems {
            self.evict_stale_systems(&mut state, &seen);
        }

        state.systems = incoming.iter().map(|(s, _)| s.clone()).collect();
        if via != FetchedVia::Systems {
            // Unregistered trees leave memory; their persisted copies stay.
            state.trees.retain(|code, _| seen.contains(code));
            state.allowed.retain(|code, _| seen.contains(code));
            state.loaded.retain(|code| seen.contains(code));
        }
        for (system, items) in incoming {
            self.apply_tree(&mut state, &system.code, items, true);
        }

        state.current = self.reconcile_current(&state);
        self.refresh_index(&mut state, true);
        self.persist_registry(&state);

        info!(
            systems = state.systems.len(),
            current = ?state.current,
            ?via,
            "menus loaded"
        );
        LoadSummary {
            systems: state.systems.clone(),
            current: state.current.clone(),
            fetched_via: via,
            committed: true,
        }
    }

    fn evict_stale_systems(&self, state: &mut MenuState, keep: &HashSet<String>) {
        let mut known: HashSet<String> = state.systems.iter().map(|s| s.code.clone()).collect();
        known.extend(state.trees.keys().cloned());
        known.extend(
            self.storage
                .keys_with_prefix(MENU_TREE_PREFIX, Tier::Persistent)
                .into_iter()
                .filter_map(|k| k.strip_prefix(MENU_TREE_PREFIX).map(str::to_string)),
        );

        for code in known.difference(keep) {
            info!(system = %code, "evicting stale system cache");
            self.storage.remove(&tree_key(code), &DEFAULT_READ_ORDER);
            state.trees.remove(code);
            state.allowed.remove(code);
            state.loaded.remove(code);
        }
    }

    /// Keep the current pointer if still valid, else the configured default,
    /// else the first system.
    fn reconcile_current(&self, state: &MenuState) -> Option<String> {
        let valid = |code: &str| state.systems.iter().any(|s| s.code == code);
        if let Some(current) = state.current.as_deref().filter(|c| valid(c)) {
            return Some(current.to_string());
        }
        if let Some(default) = self.settings.default_system.as_deref().filter(|c| valid(c)) {
            return Some(default.to_string());
        }
        state.systems.first().map(|s| s.code.clone())
    }

    // ── Reset ──

    /// Purge every persisted menu cache and all in-memory menu state. A load
    /// in flight when this runs is discarded when it resolves.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut removed = 0;
        for tier in DEFAULT_READ_ORDER {
            removed += self.storage.remove_by_prefix(MENU_TREE_PREFIX, tier);
        }
        for base in [PATH_INDEX_KEY, SYSTEMS_KEY, CURRENT_SYSTEM_KEY] {
            self.storage.remove(base, &DEFAULT_READ_ORDER);
        }
        *lock(&self.state) = MenuState::default();
        info!(removed, "menu cache reset");
    }

    // ── Internal helpers ──

    fn apply_tree(&self, state: &mut MenuState, code: &str, items: Vec<MenuItem>, persist: bool) {
        let allowed = tree::allowed_paths(&items, &self.settings.public_paths);
        if persist {
            self.persist_tree(code, &items);
        }
        state.allowed.insert(code.to_string(), allowed);
        state.trees.insert(code.to_string(), items);
        state.loaded.insert(code.to_string());
    }

    fn persist_tree(&self, code: &str, items: &[MenuItem]) {
        let base = tree_key(code);
        if items.is_empty() {
            self.storage.remove(&base, &DEFAULT_READ_ORDER);
            return;
        }
        let json = match serde_json::to_string(items) {
            Ok(json) => json,
            Err(e) => {
                warn!(system = code, error = %e, "failed to serialize menu tree");
                self.storage.remove(&base, &DEFAULT_READ_ORDER);
                return;
            }
        };
        let size = byte_len(&json);
        if size > self.settings.menu_tree_cap {
            warn!(system = code, size, cap = self.settings.menu_tree_cap, "menu tree over cap, not persisting");
            self.storage.remove(&base, &DEFAULT_READ_ORDER);
            return;
        }
        self.storage
            .write_with_eviction(&base, &json, WriteOptions::persistent(), || {
                self.ladder
                    .evict_for(&self.storage, Tier::Persistent, EvictionClass::MenuTree, &base);
            });
    }

    /// Rebuild over every registered system, hydrating trees that are only
    /// in storage so their paths keep their owners.
    fn refresh_index(&self, state: &mut MenuState, persist: bool) {
        let codes: HashSet<String> = state.systems.iter().map(|s| s.code.clone()).collect();
        for code in &codes {
            self.ensure_hydrated(state, code);
        }
        state.index = PathIndex::build(
            state
                .trees
                .iter()
                .filter(|(code, _)| codes.contains(code.as_str())),
        );
        state.index_hydrated = true;
        if !persist {
            return;
        }
        let json = match state.index.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize path index");
                return;
            }
        };
        if byte_len(&json) > self.settings.path_index_cap {
            warn!(size = byte_len(&json), "path index over cap, not persisting");
            self.storage.remove(PATH_INDEX_KEY, &DEFAULT_READ_ORDER);
            return;
        }
        self.storage
            .write_with_eviction(PATH_INDEX_KEY, &json, WriteOptions::persistent(), || {
                self.ladder.evict_for(
                    &self.storage,
                    Tier::Persistent,
                    EvictionClass::PathIndex,
                    PATH_INDEX_KEY,
                );
            });
    }

    fn ensure_hydrated(&self, state: &mut MenuState, code: &str) {
        if state.trees.contains_key(code) {
            return;
        }
        let base = tree_key(code);
        let Some(raw) = self
            .storage
            .read_with_legacy_fallback(&base, &DEFAULT_READ_ORDER)
        else {
            return;
        };
        match serde_json::from_str::<Vec<MenuItem>>(&raw) {
            Ok(items) if !items.is_empty() => {
                debug!(system = code, "hydrated menu tree from storage");
                self.apply_tree(state, code, tree::normalize(items), false);
            }
            Ok(_) => {
                debug!(system = code, "purging empty persisted menu tree");
                self.storage.remove(&base, &DEFAULT_READ_ORDER);
            }
            Err(e) => {
                warn!(system = code, error = %e, "purging malformed menu tree");
                self.storage.remove(&base, &DEFAULT_READ_ORDER);
            }
        }
    }

    fn hydrate_index(&self, state: &mut MenuState) {
        state.index_hydrated = true;
        let Some(raw) = self
            .storage
            .read_with_legacy_fallback(PATH_INDEX_KEY, &DEFAULT_READ_ORDER)
        else {
            return;
        };
        match PathIndex::from_json(&raw) {
            Ok(index) => state.index = index,
            Err(e) => {
                warn!(error = %e, "purging malformed path index");
                self.storage.remove(PATH_INDEX_KEY, &DEFAULT_READ_ORDER);
            }
        }
    }

    fn hydrate_registry(&self) {
        let mut state = lock(&self.state);
        if let Some(raw) = self
            .storage
            .read_with_legacy_fallback(SYSTEMS_KEY, &DEFAULT_READ_ORDER)
        {
            match serde_json::from_str::<Vec<System>>(&raw) {
                Ok(systems) => state.systems = systems,
                Err(e) => {
                    warn!(error = %e, "purging malformed systems list");
                    self.storage.remove(SYSTEMS_KEY, &DEFAULT_READ_ORDER);
                }
            }
        }
        state.current = self
            .storage
            .read_with_legacy_fallback(CURRENT_SYSTEM_KEY, &DEFAULT_READ_ORDER)
            .filter(|code| state.systems.iter().any(|s| &s.code == code));
    }

    fn persist_registry(&self, state: &MenuState) {
        match serde_json::to_string(&state.systems) {
            Ok(json) => {
                self.storage.write(SYSTEMS_KEY, &json, WriteOptions::persistent());
            }
            Err(e) => warn!(error = %e, "failed to serialize systems list"),
        }
        match &state.current {
            Some(code) => {
                self.storage
                    .write(CURRENT_SYSTEM_KEY, code, WriteOptions::persistent());
            }
            None => self.storage.remove(CURRENT_SYSTEM_KEY, &DEFAULT_READ_ORDER),
        }
    }
}
