//! Freeform windows: apps hosted on their own virtual display.
//!
//! The manager keeps a table of windows keyed by app identity. Depending on the policy, opening a
//! window first closes every other window or only the one for the same app. Replacement happens
//! under the table lock, so the table never holds two windows for one key.
//!
//! Lock order is window table, then display registry. Display notifications reach windows on the
//! display's dispatcher thread, without the registry lock. Task changes reach the table on the
//! task watcher thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use freeform_config::WindowPolicy;
use freeform_ipc::{FreeformKey, InputEvent};

use crate::backend::TaskEvent;
use crate::display::FreeformDisplayAdapter;
use crate::services::{ServiceGate, SystemServices};
use crate::{Error, Result};

mod config;
mod tasks;
#[allow(clippy::module_inception)]
mod window;

pub use config::{AppConfig, FreeformConfig};
pub use window::{FreeformWindow, WindowId};

pub(crate) type WindowTable = HashMap<FreeformKey, Arc<FreeformWindow>>;

#[derive(Clone)]
pub struct FreeformWindowManager {
    table: Arc<Mutex<WindowTable>>,
    policy: WindowPolicy,
    adapter: FreeformDisplayAdapter,
    gate: ServiceGate,
    /// Whether the task service reports to this manager yet.
    watching_tasks: Arc<Mutex<bool>>,
}

impl FreeformWindowManager {
    pub fn new(adapter: FreeformDisplayAdapter, gate: ServiceGate, policy: WindowPolicy) -> Self {
        Self {
            table: Arc::new(Mutex::new(WindowTable::new())),
            policy,
            adapter,
            gate,
            watching_tasks: Arc::new(Mutex::new(false)),
        }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    fn table(&self) -> MutexGuard<'_, WindowTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a freeform window for the app, replacing windows the policy says must go.
    pub fn add_window(&self, app: AppConfig, config: FreeformConfig) -> Result<FreeformKey> {
        let _span = tracy_client::span!("FreeformWindowManager::add_window");

        let services = self.gate.services()?.clone();
        self.watch_tasks(&services)?;

        if config.width == 0 || config.height == 0 || config.density_dpi == 0 {
            return Err(Error::invalid(format!(
                "invalid window geometry {}x{} at {} dpi",
                config.width, config.height, config.density_dpi
            )));
        }

        let mut config = config;
        config.populate(&services.windows.default_display());

        let key = app.key.clone();
        let window = Arc::new(FreeformWindow::new(
            app,
            config,
            services,
            self.adapter.clone(),
            Arc::downgrade(&self.table),
        ));

        let mut table = self.table();
        let replaced: Vec<_> = match self.policy {
            WindowPolicy::SingleSlot => table.drain().map(|(_, window)| window).collect(),
            WindowPolicy::PerKey => table.remove(&key).into_iter().collect(),
        };
        for old in replaced {
            debug!("replacing freeform window {}", old.key());
            old.close();
            old.destroy();
        }

        table.insert(key.clone(), window.clone());
        if let Err(err) = window.start() {
            warn!("error starting freeform window {key}: {err}");
            table.remove(&key);
            return Err(err);
        }

        info!("added freeform window {key}");
        Ok(key)
    }

    /// Starts listening to task changes, once.
    fn watch_tasks(&self, services: &SystemServices) -> Result<()> {
        let mut watching = self
            .watching_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *watching {
            return Ok(());
        }

        let sender = tasks::spawn_task_watcher(Arc::downgrade(&self.table))?;
        services.tasks.add_task_listener(Arc::new(move |event: TaskEvent| {
            if sender.send(event).is_err() {
                trace!("task watcher is gone, dropping {event:?}");
            }
        }));
        *watching = true;
        Ok(())
    }

    /// Removes the window for the key, optionally closing its app first.
    ///
    /// Does nothing if there is no such window.
    pub fn remove_window(&self, key: &FreeformKey, close: bool) {
        let _span = tracy_client::span!("FreeformWindowManager::remove_window");

        let mut table = self.table();
        let Some(window) = table.remove(key) else {
            debug!("no freeform window {key} to remove");
            return;
        };

        if close {
            window.close();
        }
        window.destroy();
        info!("removed freeform window {key}");
    }

    /// Injects a motion or key event given in window coordinates.
    pub fn forward_input(&self, key: &FreeformKey, event: InputEvent) -> Result<()> {
        let window = self.window(key).ok_or_else(|| {
            Error::invalid(format!("no freeform window {key}"))
        })?;
        window.inject(event)
    }

    pub fn window(&self, key: &FreeformKey) -> Option<Arc<FreeformWindow>> {
        self.table().get(key).cloned()
    }

    /// Keys of all open windows, sorted.
    pub fn windows(&self) -> Vec<FreeformKey> {
        let mut keys: Vec<_> = self.table().keys().cloned().collect();
        keys.sort_unstable_by_key(|key| key.to_string());
        keys
    }
}
