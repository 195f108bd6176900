//! Script discovery, compilation and the shared bytecode cache.
//!
//! The loader walks the script root, compiles every `.lua` and `.ext` file
//! to bytecode on throwaway interpreters and publishes the result as one
//! immutable `ScriptCache`. States only ever read a published cache, so a
//! recompile never blocks dispatch.
//!
//! Layout rules:
//! - hidden files and folders are skipped
//! - a numeric first folder under the root scopes its scripts to that map
//! - `.ext` files load before `.lua` files; each group is ordered by path

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mlua::Lua;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::config::ElunaConfig;
use crate::error::{ElunaError, Result};

/// One compiled script.
#[derive(Debug, Clone)]
pub struct LuaScript {
    /// File name without extension; also the `package.loaded` key.
    pub filename: String,
    pub filepath: PathBuf,
    /// Folder holding the file.
    pub modulepath: PathBuf,
    /// `.lua` or `.ext`.
    pub fileext: String,
    pub bytecode: Vec<u8>,
    /// Map the script is scoped to, -1 for every state.
    pub map_id: i64,
}

impl LuaScript {
    pub fn is_extension(&self) -> bool {
        self.fileext == ".ext"
    }
}

#[derive(Debug, Default)]
pub struct ScriptCache {
    pub scripts: Vec<LuaScript>,
    pub require_path: String,
    pub require_cpath: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheState {
    None = 0,
    Reinit = 1,
    Loading = 2,
    Ready = 3,
}

impl CacheState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Reinit,
            2 => Self::Loading,
            3 => Self::Ready,
            _ => Self::None,
        }
    }
}

/// Outcome of one load pass.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded: usize,
    /// (file, message) for every script that failed to read or compile.
    pub failures: Vec<(PathBuf, String)>,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A file found by the scan, not yet compiled.
struct PendingScript {
    filename: String,
    filepath: PathBuf,
    modulepath: PathBuf,
    fileext: String,
    map_id: i64,
}

pub struct ElunaLoader {
    config: Arc<ElunaConfig>,
    state: AtomicU8,
    cache: RwLock<Arc<ScriptCache>>,
    last_report: Mutex<LoadReport>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ElunaLoader {
    pub fn new(config: Arc<ElunaConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: AtomicU8::new(CacheState::None as u8),
            cache: RwLock::new(Arc::new(ScriptCache::default())),
            last_report: Mutex::new(LoadReport::default()),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Arc<ElunaConfig> {
        &self.config
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CacheState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Current published cache.
    pub fn cache(&self) -> Arc<ScriptCache> {
        Arc::clone(&self.cache.read())
    }

    pub fn last_report(&self) -> LoadReport {
        self.last_report.lock().clone()
    }

    /// Scan and compile the script root on the calling thread, then publish
    /// the new cache. A missing root publishes an empty cache.
    pub fn load_scripts(&self) -> Result<LoadReport> {
        self.set_state(CacheState::Loading);
        let start = Instant::now();
        let root = self.config.script_root();
        tracing::info!("[Eluna]: Searching scripts from `{}`", root.display());

        let mut pending = Vec::new();
        let mut folders = Vec::new();
        if root.is_dir() {
            if let Err(e) = read_files(&root, &root, &mut pending, &mut folders) {
                self.set_state(CacheState::Ready);
                return Err(e);
            }
        } else {
            tracing::error!("[Eluna]: Script root `{}` does not exist, no scripts loaded", root.display());
        }

        let compiled: Vec<std::result::Result<LuaScript, ElunaError>> = pending
            .into_par_iter()
            .map_init(Lua::new, |lua, script| compile_script(lua, script))
            .collect();

        let mut report = LoadReport::default();
        let mut extensions = Vec::new();
        let mut scripts = Vec::new();
        for result in compiled {
            match result {
                Ok(script) if script.is_extension() => extensions.push(script),
                Ok(script) => scripts.push(script),
                Err(e) => {
                    tracing::error!("[Eluna]: {}", e);
                    let path = match &e {
                        ElunaError::Compile { path, .. } | ElunaError::ReadScript { path, .. } => path.clone(),
                        _ => root.clone(),
                    };
                    report.failures.push((path, e.to_string()));
                }
            }
        }
        extensions.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        scripts.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        extensions.append(&mut scripts);

        let cache = ScriptCache {
            require_path: require_path(&folders, &self.config),
            require_cpath: require_cpath(&folders, &self.config),
            scripts: extensions,
        };
        report.loaded = cache.scripts.len();
        report.elapsed = start.elapsed();

        *self.cache.write() = Arc::new(cache);
        *self.last_report.lock() = report.clone();
        self.set_state(CacheState::Ready);

        tracing::info!(
            "[Eluna]: Loaded {} scripts in {} ms",
            report.loaded,
            report.elapsed.as_millis()
        );
        Ok(report)
    }

    /// Recompile on a background thread. Ignored while a load is already
    /// running.
    pub fn reload_cache(self: &Arc<Self>) {
        if !self.try_begin_reload() {
            tracing::debug!("[Eluna]: Script cache reload already in progress");
            return;
        }

        let loader = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            if let Err(e) = loader.load_scripts() {
                tracing::error!("[Eluna]: Script cache reload failed: {}", e);
            }
        });

        let mut worker = self.worker.lock();
        if let Some(previous) = worker.replace(handle) {
            let _ = previous.join();
        }
    }

    /// Move an idle cache (`None` or `Ready`) to `Reinit`. Only one caller
    /// wins when several race.
    fn try_begin_reload(&self) -> bool {
        [CacheState::Ready, CacheState::None].into_iter().any(|from| {
            self.state
                .compare_exchange(from as u8, CacheState::Reinit as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Block until a background reload has finished.
    pub fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("[Eluna]: Script loader thread panicked");
                self.set_state(CacheState::Ready);
            }
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Map id of a file: its first folder under the root, when numeric.
fn map_id_for(root: &Path, path: &Path) -> i64 {
    let Ok(relative) = path.strip_prefix(root) else {
        return -1;
    };
    let mut components = relative.components();
    let first = components.next();
    if components.next().is_none() {
        // file directly in the root
        return -1;
    }
    first
        .and_then(|c| c.as_os_str().to_str())
        .and_then(|s| s.parse::<u32>().ok())
        .map_or(-1, i64::from)
}

fn read_files(root: &Path, dir: &Path, pending: &mut Vec<PendingScript>, folders: &mut Vec<PathBuf>) -> Result<()> {
    tracing::debug!("[Eluna]: GetScripts from path `{}`", dir.display());
    let entries = fs::read_dir(dir).map_err(|source| ElunaError::ScriptRoot { path: dir.to_path_buf(), source })?;
    folders.push(dir.to_path_buf());

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            if let Err(e) = read_files(root, &path, pending, folders) {
                tracing::error!("[Eluna]: {}", e);
            }
            continue;
        }
        if !path.is_file() {
            continue;
        }

        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if ext != "lua" && ext != "ext" {
            continue;
        }

        pending.push(PendingScript {
            filename: stem.to_string(),
            modulepath: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            fileext: format!(".{}", ext),
            map_id: map_id_for(root, &path),
            filepath: path,
        });
    }
    Ok(())
}

fn compile_script(lua: &mut Lua, script: PendingScript) -> std::result::Result<LuaScript, ElunaError> {
    let source = fs::read(&script.filepath).map_err(|source| ElunaError::ReadScript {
        path: script.filepath.clone(),
        source,
    })?;

    let function = lua
        .load(source.as_slice())
        .set_name(format!("@{}", script.filepath.display()))
        .into_function()
        .map_err(|e| ElunaError::Compile { path: script.filepath.clone(), message: e.to_string() })?;

    Ok(LuaScript {
        bytecode: function.dump(false),
        filename: script.filename,
        filepath: script.filepath,
        modulepath: script.modulepath,
        fileext: script.fileext,
        map_id: script.map_id,
    })
}

fn require_path(folders: &[PathBuf], config: &ElunaConfig) -> String {
    folders
        .iter()
        .flat_map(|dir| [format!("{}/?.lua", dir.display()), format!("{}/?.ext", dir.display())])
        .chain(config.require_path_fragments().map(str::to_string))
        .collect::<Vec<_>>()
        .join(";")
}

fn require_cpath(folders: &[PathBuf], config: &ElunaConfig) -> String {
    folders
        .iter()
        .flat_map(|dir| [format!("{}/?.dll", dir.display()), format!("{}/?.so", dir.display())])
        .chain(config.require_cpath_fragments().map(str::to_string))
        .collect::<Vec<_>>()
        .join(";")
}

// ---------------------------------------------------------------------------
// File watcher
// ---------------------------------------------------------------------------

/// Watches the script root and reports script changes.
pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

impl ScriptWatcher {
    pub fn new(root: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        anyhow::ensure!(root.is_dir(), "script root '{}' does not exist", root.display());

        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(Duration::from_millis(500)),
            )
            .context("configure script watcher")?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", root.display()))?;

        tracing::info!("[Eluna]: Watching `{}` for script changes", root.display());
        Ok(Self { _watcher: watcher, rx })
    }

    /// Drain pending events; true if any script file changed.
    pub fn drain_changes(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if Self::is_relevant(&event.kind) && event.paths.iter().any(|p| is_script_path(p)) {
                        changed = true;
                    }
                }
                Err(err) => tracing::error!("[Eluna]: script watcher error: {}", err),
            }
        }
        changed
    }

    fn is_relevant(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Modify(ModifyKind::Any)
                | EventKind::Create(_)
                | EventKind::Remove(_)
        )
    }
}

fn is_script_path(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("lua") | Some("ext"))
}
