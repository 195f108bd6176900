//! State manager: owns the world state, the per-map states and the shared
//! script loader, and routes reload requests to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::ElunaConfig;
use crate::core::{parse_reload_command, ElunaInfo, ReloadScope};
use crate::error::{ElunaError, Result};
use crate::host::Host;
use crate::loader::{ElunaLoader, ScriptWatcher};
use crate::scripting::Eluna;

pub struct ElunaMgr {
    config: Arc<ElunaConfig>,
    loader: Arc<ElunaLoader>,
    host: Arc<dyn Host>,
    states: RwLock<BTreeMap<u64, Arc<Eluna>>>,
    watcher: Option<Mutex<ScriptWatcher>>,
}

impl ElunaMgr {
    /// Load the script cache and create the world state.
    pub fn new(config: ElunaConfig, host: Arc<dyn Host>) -> Result<Self> {
        if !config.enabled {
            return Err(ElunaError::Disabled);
        }
        let config = Arc::new(config);
        let loader = ElunaLoader::new(Arc::clone(&config));
        loader.load_scripts()?;

        let watcher = if config.script_reloader {
            match ScriptWatcher::new(&config.script_root()) {
                Ok(watcher) => Some(Mutex::new(watcher)),
                Err(e) => {
                    tracing::error!("[Eluna]: Script reloader disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let mgr = Self {
            config,
            loader,
            host,
            states: RwLock::new(BTreeMap::new()),
            watcher,
        };
        mgr.create(ElunaInfo::global())?;
        Ok(mgr)
    }

    pub fn config(&self) -> &Arc<ElunaConfig> {
        &self.config
    }

    pub fn loader(&self) -> &Arc<ElunaLoader> {
        &self.loader
    }

    /// Create the state for `info`, or return the live one.
    ///
    /// Map states exist only in multi-state mode and only for allowed maps;
    /// `Ok(None)` means the map runs without its own state.
    pub fn create(&self, info: ElunaInfo) -> Result<Option<Arc<Eluna>>> {
        if !info.is_global() {
            if self.config.compatibility_mode || !self.config.should_map_load(info.map_id) {
                return Ok(None);
            }
        }

        if let Some(existing) = self.get(info) {
            return Ok(Some(existing));
        }

        let eluna = Arc::new(Eluna::new(
            info,
            Arc::clone(&self.config),
            Arc::clone(&self.loader),
            Arc::clone(&self.host),
        )?);
        let mut states = self.states.write();
        let entry = states.entry(info.key()).or_insert(eluna);
        Ok(Some(Arc::clone(entry)))
    }

    pub fn get(&self, info: ElunaInfo) -> Option<Arc<Eluna>> {
        self.states.read().get(&info.key()).cloned()
    }

    pub fn world(&self) -> Option<Arc<Eluna>> {
        self.get(ElunaInfo::global())
    }

    /// Drop the state for `info`. The interpreter is freed once the last
    /// `Arc` held by a caller goes away.
    pub fn destroy(&self, info: ElunaInfo) -> bool {
        self.states.write().remove(&info.key()).is_some()
    }

    pub fn state_count(&self) -> usize {
        self.states.read().len()
    }

    fn states_where(&self, pred: impl Fn(&ElunaInfo) -> bool) -> Vec<Arc<Eluna>> {
        self.states
            .read()
            .values()
            .filter(|eluna| pred(&eluna.info()))
            .cloned()
            .collect()
    }

    /// Recompile the script cache and mark the targeted states. Marked states
    /// rebuild at their next safe point, once the new cache is published.
    pub fn reload(&self, scope: ReloadScope) {
        let targets = match scope {
            ReloadScope::CacheOnly => Vec::new(),
            ReloadScope::AllStates => self.states_where(|_| true),
            ReloadScope::GlobalState => self.states_where(ElunaInfo::is_global),
            ReloadScope::Map(map_id) => {
                let targets = self.states_where(|info| !info.is_global() && info.map_id == map_id);
                if targets.is_empty() {
                    tracing::info!("[Eluna]: No state for map {}, reloading script cache only", map_id);
                }
                targets
            }
        };

        self.loader.reload_cache();
        for eluna in &targets {
            eluna.request_reload();
        }
        tracing::info!("[Eluna]: Reload requested for {} state(s)", targets.len());
    }

    /// Handle a `reload eluna [arg]` console command.
    pub fn handle_command(&self, command: &str) -> Result<ReloadScope> {
        let scope = parse_reload_command(command)?;
        self.host.announce("Reloading Eluna...");
        self.reload(scope);
        Ok(scope)
    }

    /// Per-tick entry point: pick up watched file changes, then run every
    /// state's safe point.
    pub fn update(&self, diff: u32) {
        if self.watcher.as_ref().is_some_and(|w| w.lock().drain_changes()) {
            tracing::info!("[Eluna]: Script change detected, reloading all states");
            self.reload(ReloadScope::AllStates);
        }

        for eluna in self.states_where(|_| true) {
            eluna.update(diff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullHost;

    fn mgr(config: ElunaConfig) -> ElunaMgr {
        ElunaMgr::new(config, Arc::new(NullHost)).unwrap()
    }

    #[test]
    fn test_world_state_is_created() {
        let mgr = mgr(ElunaConfig::default());
        assert_eq!(mgr.state_count(), 1);
        assert!(mgr.world().is_some());
    }

    #[test]
    fn test_disabled_config() {
        let config = ElunaConfig { enabled: false, ..ElunaConfig::default() };
        assert!(matches!(ElunaMgr::new(config, Arc::new(NullHost)), Err(ElunaError::Disabled)));
    }

    #[test]
    fn test_map_states_respect_config() {
        let mgr = mgr(ElunaConfig { only_on_maps: "0, 1".to_string(), ..ElunaConfig::default() });
        assert!(mgr.create(ElunaInfo::map(0, 0)).unwrap().is_some());
        assert!(mgr.create(ElunaInfo::map(1, 2)).unwrap().is_some());
        assert!(mgr.create(ElunaInfo::map(530, 0)).unwrap().is_none());
        assert_eq!(mgr.state_count(), 3);

        let again = mgr.create(ElunaInfo::map(0, 0)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&again, &mgr.get(ElunaInfo::map(0, 0)).unwrap()));

        assert!(mgr.destroy(ElunaInfo::map(0, 0)));
        assert!(!mgr.destroy(ElunaInfo::map(0, 0)));
    }

    #[test]
    fn test_compatibility_mode_has_no_map_states() {
        let mgr = mgr(ElunaConfig { compatibility_mode: true, ..ElunaConfig::default() });
        assert!(mgr.create(ElunaInfo::map(0, 0)).unwrap().is_none());
        assert_eq!(mgr.state_count(), 1);
    }

    #[test]
    fn test_map_reload_marks_only_that_map() {
        let mgr = mgr(ElunaConfig::default());
        let a = mgr.create(ElunaInfo::map(0, 0)).unwrap().unwrap();
        let b = mgr.create(ElunaInfo::map(1, 0)).unwrap().unwrap();

        mgr.handle_command("reload eluna 0").unwrap();
        mgr.loader().wait();
        assert!(a.context().reload_requested());
        assert!(!b.context().reload_requested());
        assert!(!mgr.world().unwrap().context().reload_requested());

        mgr.update(0);
        assert!(!a.context().reload_requested());
    }

    #[test]
    fn test_cache_only_reload_marks_nothing() {
        let mgr = mgr(ElunaConfig::default());
        mgr.handle_command("reload eluna -3").unwrap();
        mgr.loader().wait();
        assert!(!mgr.world().unwrap().context().reload_requested());
    }
}
