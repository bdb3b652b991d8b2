//! NavCache — the composed navigation state cache.
//!
//! Wires both halves onto one pair of storage tiers:
//! - Menu cache (persistent tier, shared, async load)
//! - Tab sessions (volatile tier, current system only)
//!
//! A route change is authorized against the menu cache first; only allowed
//! routes open a tab.

use std::sync::Arc;

use tracing::debug;

use crate::config::NavConfig;
use crate::menu::source::{HttpMenuSource, MenuSource};
use crate::menu::{LoadMode, LoadSummary, MenuCache, MenuError};
use crate::route::RouteLocation;
use crate::storage::backend::{MemoryBackend, StorageBackend};
use crate::storage::error::StorageResult;
use crate::storage::eviction::{EvictionClass, EvictionLadder};
use crate::storage::file::FileBackend;
use crate::storage::namespace::Namespaced;
use crate::storage::{KvStore, Tier, WriteOptions, WriteOutcome, DEFAULT_READ_ORDER};
use crate::tabs::TabSessions;

/// File name of the persistent tier inside `data_dir`.
pub const PERSISTENT_STORE_FILE: &str = "persistent.bin";

/// Outcome of a route change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Allowed and tracked as the active tab.
    Opened { tab_key: String },
    /// Allowed, but the route is not shown as a tab.
    AllowedWithoutTab,
    /// Not in the current system's allow-list (or any other system's).
    Denied,
}

pub struct NavCache {
    storage: Namespaced,
    ladder: EvictionLadder,
    menus: Arc<MenuCache>,
    tabs: TabSessions,
}

impl NavCache {
    /// Open with a file-backed persistent tier under `config.data_dir()` and an
    /// in-memory volatile tier. Falls back to the config's HTTP source when
    /// `source` is `None`.
    pub fn open(config: &NavConfig, source: Option<Arc<dyn MenuSource>>) -> StorageResult<Self> {
        let mut persistent = FileBackend::open(&config.data_dir().join(PERSISTENT_STORE_FILE))?;
        if let Some(quota) = config.persistent_quota {
            persistent = persistent.with_quota(quota);
        }
        let volatile = match config.volatile_quota {
            Some(quota) => MemoryBackend::with_quota(quota),
            None => MemoryBackend::new(),
        };
        let persistent: Arc<dyn StorageBackend> = Arc::new(persistent);
        let store = KvStore::new(persistent, Arc::new(volatile));

        let source = source.or_else(|| {
            config
                .menu_source_url
                .as_ref()
                .map(|url| Arc::new(HttpMenuSource::new(url.clone())) as Arc<dyn MenuSource>)
        });
        Ok(Self::with_store(store, config, source))
    }

    /// Build on an existing store.
    pub fn with_store(
        store: KvStore,
        config: &NavConfig,
        source: Option<Arc<dyn MenuSource>>,
    ) -> Self {
        let storage = Namespaced::new(store, config.namespace.clone());
        let ladder = EvictionLadder::default();
        let menus = Arc::new(
            MenuCache::new(storage.clone(), config.menu_settings(), source)
                .with_ladder(ladder.clone()),
        );
        let current = menus.current_system().unwrap_or_default();
        let tabs = TabSessions::new(storage.store().clone(), &current)
            .with_redirect_prefix(config.redirect_prefix.clone());
        Self {
            storage,
            ladder,
            menus,
            tabs,
        }
    }

    pub fn menus(&self) -> &Arc<MenuCache> {
        &self.menus
    }

    pub fn tabs(&self) -> &TabSessions {
        &self.tabs
    }

    pub fn tabs_mut(&mut self) -> &mut TabSessions {
        &mut self.tabs
    }

    /// Load menus and point the tab sessions at the reconciled system.
    pub async fn load_menus(&mut self, mode: Option<LoadMode>) -> Result<LoadSummary, MenuError> {
        let summary = self.menus.load_menus(mode).await?;
        self.sync_tabs_to_menus();
        Ok(summary)
    }

    /// Authorize `route` and, if allowed, open its tab. A path owned by a
    /// different system switches to that system first.
    pub fn on_route_change(&mut self, route: &RouteLocation) -> RouteDecision {
        if !self.menus.can_access(route) {
            let owner = self
                .menus
                .resolve_system_by_menu_key(&route.path)
                .filter(|code| self.menus.current_system().as_deref() != Some(code.as_str()));
            let Some(owner) = owner else {
                return RouteDecision::Denied;
            };
            if self.switch_system(&owner).is_err() || !self.menus.can_access(route) {
                return RouteDecision::Denied;
            }
            debug!(path = %route.path, system = %owner, "route switched system");
        }
        match self.tabs.open_by_route(route) {
            Some(tab_key) => RouteDecision::Opened { tab_key },
            None => RouteDecision::AllowedWithoutTab,
        }
    }

    /// Make `code` current for both menus and tabs.
    pub fn switch_system(&mut self, code: &str) -> Result<(), MenuError> {
        self.menus.set_current_system(code)?;
        self.tabs.set_current_system(code);
        Ok(())
    }

    /// Persist a shell-owned cache entry (layout, theme, user) through the
    /// eviction ladder.
    pub fn write_shell_entry(&self, class: EvictionClass, base: &str, value: &str) -> WriteOutcome {
        self.storage
            .write_with_eviction(base, value, WriteOptions::persistent(), || {
                self.ladder
                    .evict_for(&self.storage, Tier::Persistent, class, base);
            })
    }

    pub fn read_shell_entry(&self, base: &str) -> Option<String> {
        self.storage.read_with_legacy_fallback(base, &DEFAULT_READ_ORDER)
    }

    /// Purge all menu and tab state. Tabs follow the menus to no system.
    pub fn reset(&mut self) {
        self.menus.reset();
        self.tabs.reset();
        self.sync_tabs_to_menus();
    }

    fn sync_tabs_to_menus(&mut self) {
        let current = self.menus.current_system().unwrap_or_default();
        if self.tabs.current_system() != current {
            self.tabs.set_current_system(&current);
        }
    }
}
