//! End-to-end flows through `NavCache`: load, route changes, system switches,
//! reopen from disk, reset.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use navcache::config::NavConfig;
use navcache::menu::source::{MenuSource, MenuSystem, SourceError};
use navcache::menu::tree::MenuItem;
use navcache::menu::FetchedVia;
use navcache::route::RouteLocation;
use navcache::storage::{KvStore, Tier};
use navcache::{NavCache, RouteDecision};

/// Serves whatever systems it currently holds, counting fetches.
struct ScriptedSource {
    calls: AtomicUsize,
    systems: Mutex<Vec<MenuSystem>>,
}

impl ScriptedSource {
    fn new(systems: Vec<MenuSystem>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            systems: Mutex::new(systems),
        })
    }

    fn replace(&self, systems: Vec<MenuSystem>) {
        *self.systems.lock().unwrap() = systems;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MenuSource for ScriptedSource {
    async fn fetch_menu_tree(&self) -> Result<Vec<MenuItem>, SourceError> {
        Err(SourceError::Fetch("single tree not served".into()))
    }

    async fn fetch_menu_systems(&self) -> Result<Vec<MenuSystem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(self.systems.lock().unwrap().clone())
    }
}

fn system(code: &str, paths: &[&str]) -> MenuSystem {
    MenuSystem {
        code: code.into(),
        name: code.to_uppercase(),
        menus: paths.iter().map(|p| MenuItem::new(*p, *p)).collect(),
    }
}

fn crm_and_ops() -> Vec<MenuSystem> {
    vec![
        system("crm", &["/crm/leads", "/crm/accounts"]),
        system("ops", &["/ops/jobs"]),
    ]
}

fn opened_key(decision: RouteDecision) -> String {
    match decision {
        RouteDecision::Opened { tab_key } => tab_key,
        other => panic!("expected a tab, got {other:?}"),
    }
}

#[tokio::test]
async fn load_then_navigate_across_systems() {
    let source = ScriptedSource::new(crm_and_ops());
    let config = NavConfig {
        default_system: Some("ops".into()),
        ..NavConfig::default()
    };
    let mut nav = NavCache::with_store(KvStore::in_memory(), &config, Some(source.clone()));

    let summary = nav.load_menus(None).await.unwrap();
    assert_eq!(summary.fetched_via, FetchedVia::Systems);
    assert_eq!(summary.current.as_deref(), Some("ops"));
    assert_eq!(nav.tabs().current_system(), "ops");

    let jobs = opened_key(nav.on_route_change(&RouteLocation::new("/ops/jobs")));
    assert_eq!(nav.tabs().active_key(), jobs);

    // A crm path pulls the cache over to crm.
    let leads = RouteLocation::new("/crm/leads").with_query("page", "2");
    opened_key(nav.on_route_change(&leads));
    assert_eq!(nav.menus().current_system().as_deref(), Some("crm"));
    assert_eq!(nav.tabs().tabs().len(), 1);
    assert_eq!(nav.tabs().tabs()[0].full_path, "/crm/leads?page=2");

    assert_eq!(
        nav.on_route_change(&RouteLocation::new("/billing")),
        RouteDecision::Denied
    );

    nav.switch_system("ops").unwrap();
    assert_eq!(nav.tabs().active_key(), jobs);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn overlapping_loads_share_one_fetch() {
    let source = ScriptedSource::new(crm_and_ops());
    let nav = NavCache::with_store(KvStore::in_memory(), &NavConfig::default(), Some(source.clone()));
    let menus = nav.menus().clone();

    let (a, b) = tokio::join!(menus.load_menus(None), menus.load_menus(None));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn reload_drops_systems_no_longer_served() {
    let source = ScriptedSource::new(crm_and_ops());
    let mut nav = NavCache::with_store(KvStore::in_memory(), &NavConfig::default(), Some(source.clone()));
    nav.load_menus(None).await.unwrap();
    assert_eq!(nav.menus().persisted_tree_sizes().len(), 2);

    source.replace(vec![system("ops", &["/ops/jobs", "/ops/queues"])]);
    let summary = nav.load_menus(None).await.unwrap();

    assert_eq!(summary.current.as_deref(), Some("ops"));
    let codes: Vec<String> = nav
        .menus()
        .persisted_tree_sizes()
        .into_iter()
        .map(|(code, _)| code)
        .collect();
    assert_eq!(codes, vec!["ops".to_string()]);
    assert_eq!(nav.menus().resolve_system_by_menu_key("/crm/leads"), None);
    assert_eq!(nav.tabs().current_system(), "ops");
}

#[tokio::test]
async fn menus_survive_reopen_but_tabs_do_not() {
    let dir = TempDir::new().unwrap();
    let config = NavConfig {
        namespace: "acme".into(),
        data_dir: Some(dir.path().to_path_buf()),
        ..NavConfig::default()
    };
    let source = ScriptedSource::new(crm_and_ops());
    {
        let mut nav = NavCache::open(&config, Some(source.clone())).unwrap();
        nav.load_menus(None).await.unwrap();
        opened_key(nav.on_route_change(&RouteLocation::new("/crm/leads")));
    }

    let mut nav = NavCache::open(&config, None).unwrap();
    assert_eq!(nav.menus().current_system().as_deref(), Some("crm"));
    assert!(nav.menus().is_allowed("/crm/accounts"));
    assert_eq!(nav.menus().resolve_system_by_menu_key("/ops/jobs").as_deref(), Some("ops"));
    assert!(nav.tabs().tabs().is_empty());

    opened_key(nav.on_route_change(&RouteLocation::new("/crm/accounts")));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn reset_wipes_everything_in_namespace() {
    let store = KvStore::in_memory();
    let config = NavConfig {
        namespace: "acme".into(),
        ..NavConfig::default()
    };
    let source = ScriptedSource::new(crm_and_ops());
    let mut nav = NavCache::with_store(store.clone(), &config, Some(source));
    nav.load_menus(None).await.unwrap();
    nav.on_route_change(&RouteLocation::new("/crm/leads"));

    // Unrelated keys outside the cache survive.
    store.write("other-app", "1", navcache::storage::WriteOptions::persistent());

    nav.reset();
    assert!(nav.menus().systems().is_empty());
    assert!(nav.tabs().tabs().is_empty());
    assert_eq!(store.keys(Tier::Persistent), vec!["other-app".to_string()]);
    assert!(store.keys(Tier::Volatile).is_empty());
}
