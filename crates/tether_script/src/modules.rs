//! Module resolution and loading
//!
//! Specifiers resolve against the directory of the importing module, gain
//! the default extension when they have none, and are normalised lexically.
//! The resolved path is the module's identity: QuickJS keeps one module per
//! name, and [`ModuleCache`] records every name compiled during a session.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::{Ctx, Exception, Module};
use tether_core::sync::lock;
use tracing::debug;

/// Resolve `name` as imported from the module `base`.
pub fn resolve_specifier(base: &str, name: &str, extension: &str) -> String {
    let requested = Path::new(name);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        Path::new(base)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(requested)
    };

    let mut resolved = normalize(&joined).into_os_string();
    let known = matches!(
        Path::new(&resolved).extension().and_then(OsStr::to_str),
        Some("js") | Some("mjs")
    );
    if !known && !extension.is_empty() {
        resolved.push(".");
        resolved.push(extension);
    }
    resolved.to_string_lossy().replace('\\', "/")
}

/// Lexically remove `.` and `..` components. Does not touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Names of every module compiled during the current engine session.
#[derive(Clone, Default)]
pub struct ModuleCache {
    inner: Arc<ModuleCacheInner>,
}

#[derive(Default)]
struct ModuleCacheInner {
    compiled: Mutex<HashSet<String>>,
    compilations: AtomicUsize,
}

impl ModuleCache {
    pub fn contains(&self, path: &str) -> bool {
        lock(&self.inner.compiled).contains(path)
    }

    /// Record a compilation. Returns `false` if the path was already present.
    pub fn record(&self, path: &str) -> bool {
        self.inner.compilations.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.compiled).insert(path.to_string())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.compiled).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total compilations recorded, duplicates included.
    pub fn compilations(&self) -> usize {
        self.inner.compilations.load(Ordering::Relaxed)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.inner.compiled).iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn clear(&self) {
        lock(&self.inner.compiled).clear();
        self.inner.compilations.store(0, Ordering::Relaxed);
    }
}

/// Resolves import specifiers relative to the importing module.
pub struct PathResolver {
    extension: String,
}

impl PathResolver {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
        }
    }
}

impl Resolver for PathResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        let resolved = resolve_specifier(base, name, &self.extension);
        debug!(target: "script", "resolve '{}' from '{}' -> '{}'", name, base, resolved);
        Ok(resolved)
    }
}

/// Reads and compiles module files, recording each in the cache.
pub struct FileLoader {
    cache: ModuleCache,
}

impl FileLoader {
    pub fn new(cache: ModuleCache) -> Self {
        Self { cache }
    }
}

impl Loader for FileLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, path: &str) -> rquickjs::Result<Module<'js>> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                debug!(target: "script", "cannot open module '{}': {}", path, err);
                return Err(Exception::throw_reference(
                    ctx,
                    &format!("Could not open module '{path}'"),
                ));
            }
        };
        let module = Module::declare(ctx.clone(), path, source)?;
        self.cache.record(path);
        debug!(target: "script", "compiled module '{}'", path);
        Ok(module)
    }
}
