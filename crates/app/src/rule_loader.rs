//! Rule loader: keeps the processors' rule sets in step with the rule
//! module files.
//!
//! | File event | Action |
//! |------------|--------|
//! | created    | `load` |
//! | modified   | `unload` then `load` |
//! | deleted    | `unload` |
//! | moved      | `unload(from)` then `load(to)` |
//!
//! Loading a module that is already loaded replaces its rules. Failures are
//! logged per file and never stop the watch loop.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::function::FunctionCatalog;
use crate::ports::file_events::{self, FileEvent};
use crate::ports::rule_source::RuleModuleSource;
use crate::processors::TriggerProcessor;
use crate::rule::RuleBinding;

pub struct RuleLoader<S> {
    source: S,
    catalog: FunctionCatalog,
    processors: Vec<Arc<dyn TriggerProcessor>>,
    loaded: Mutex<BTreeSet<String>>,
    serial: tokio::sync::Mutex<()>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RuleModuleSource + 'static> RuleLoader<S> {
    #[must_use]
    pub fn new(
        source: S,
        catalog: FunctionCatalog,
        processors: Vec<Arc<dyn TriggerProcessor>>,
    ) -> Self {
        Self {
            source,
            catalog,
            processors,
            loaded: Mutex::new(BTreeSet::new()),
            serial: tokio::sync::Mutex::new(()),
            watch_task: Mutex::new(None),
        }
    }

    /// Currently loaded module identities.
    #[must_use]
    pub fn loaded_modules(&self) -> Vec<String> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Load every rule module present, then apply `events` as they arrive.
    pub async fn start(self: &Arc<Self>, mut events: mpsc::Receiver<FileEvent>) {
        self.reload().await;
        let loader = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                loader.handle(&event).await;
            }
            debug!("rule directory watch ended");
        });
        let previous = self
            .watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("observing rule modules");
    }

    /// Stop applying file events. Registered rules stay in place.
    pub fn close(&self) {
        let watch = self
            .watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watch) = watch {
            watch.abort();
            info!("observing rule modules stopped");
        }
    }

    /// Apply one filesystem event.
    pub async fn handle(&self, event: &FileEvent) {
        match event {
            FileEvent::Created(path) => self.load_path(path).await,
            FileEvent::Modified(path) => {
                debug!(path = %path.display(), "rule module modified");
                self.unload_path(path).await;
                self.load_path(path).await;
            }
            FileEvent::Deleted(path) => {
                debug!(path = %path.display(), "rule module deleted");
                self.unload_path(path).await;
            }
            FileEvent::Moved { from, to } => {
                self.unload_path(from).await;
                self.load_path(to).await;
            }
        }
    }

    /// (Re)load every module file currently present and unload modules
    /// whose file is gone.
    pub async fn reload(&self) {
        let files = match self.source.list_files().await {
            Ok(files) => files,
            Err(error) => {
                warn!(%error, "failed to list rule modules");
                return;
            }
        };
        debug!(count = files.len(), files = ?files, "rule modules found");

        let present: BTreeSet<String> = files
            .iter()
            .filter_map(|file| self.source.module_id(file))
            .collect();
        for module in self.loaded_modules() {
            if !present.contains(&module) {
                self.unload_module(&module).await;
            }
        }
        for file in &files {
            self.load(file).await;
        }
    }

    /// Load (or reload) the module stored in `file_name`.
    pub async fn load(&self, file_name: &str) {
        let Some(module) = self.source.module_id(file_name) else {
            return;
        };
        let _serial = self.serial.lock().await;

        let reloading = self.is_loaded(&module);
        if reloading {
            self.remove_rules(&module);
        }

        let annotations = match self.source.parse_annotations(&module).await {
            Ok(annotations) => annotations,
            Err(error) => {
                self.mark_unloaded(&module);
                warn!(file = file_name, %error, "failed to (re)load rule module");
                return;
            }
        };
        if annotations.is_empty() {
            self.mark_unloaded(&module);
            info!(file = file_name, "rule module ignored (no declarations)");
            return;
        }

        for (function_name, declarations) in &annotations {
            let Some(function) = self.catalog.get(function_name) else {
                warn!(
                    file = file_name,
                    function = %function_name,
                    "rule module names an unknown function, skipped"
                );
                continue;
            };
            let binding = RuleBinding::new(module.as_str(), function);
            for declaration in declarations {
                self.offer(declaration, &binding).await;
            }
        }

        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module);
        if reloading {
            info!(file = file_name, "rule module reloaded");
        } else {
            info!(file = file_name, "rule module loaded");
        }
    }

    /// Remove every rule of the module stored in `file_name`.
    pub async fn unload(&self, file_name: &str) {
        if let Some(module) = self.source.module_id(file_name) {
            self.unload_module(&module).await;
        }
    }

    async fn unload_module(&self, module: &str) {
        let _serial = self.serial.lock().await;
        if !self.is_loaded(module) {
            return;
        }
        self.remove_rules(module);
        self.mark_unloaded(module);
        info!(module, "rule module unloaded");
    }

    async fn load_path(&self, path: &Path) {
        if let Some(file_name) = file_events::file_name(path) {
            self.load(file_name).await;
        }
    }

    async fn unload_path(&self, path: &Path) {
        if let Some(file_name) = file_events::file_name(path) {
            self.unload(file_name).await;
        }
    }

    async fn offer(&self, declaration: &str, binding: &RuleBinding) {
        let mut registered = false;
        for processor in &self.processors {
            if processor.on_annotation(declaration, binding).await {
                registered = true;
            }
        }
        if !registered {
            warn!(
                module = %binding.module,
                function = binding.function.name(),
                trigger = declaration,
                "declaration not registered"
            );
        }
    }

    fn remove_rules(&self, module: &str) {
        for processor in &self.processors {
            processor.remove_rules_for_module(module);
        }
    }

    fn is_loaded(&self, module: &str) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(module)
    }

    fn mark_unloaded(&self, module: &str) {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module);
    }
}
