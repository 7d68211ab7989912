use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::Context;
use freeform_ipc::{FreeformKey, InputEvent};

use super::config::{AppConfig, FreeformConfig};
use super::WindowTable;
use crate::backend::{TaskEvent, TaskId, ViewId};
use crate::client::{ClientHandle, ClientId};
use crate::display::{DisplayCallback, FreeformDisplayAdapter, FreeformParams};
use crate::services::SystemServices;
use crate::{Error, Result};

static WINDOW_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    fn next() -> WindowId {
        WindowId(WINDOW_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// An app hosted on its own freeform display.
///
/// The window is the owner of its backing display and receives its lifecycle notifications.
pub struct FreeformWindow {
    id: WindowId,
    app: AppConfig,
    config: FreeformConfig,
    client: ClientHandle,
    services: SystemServices,
    adapter: FreeformDisplayAdapter,
    /// Table the window lives in, to take itself out when launching fails.
    table: Weak<Mutex<WindowTable>>,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    view: Option<ViewId>,
    display: Option<ClientId>,
    display_id: Option<u32>,
    task_id: Option<TaskId>,
    destroyed: bool,
}

impl FreeformWindow {
    pub(super) fn new(
        app: AppConfig,
        config: FreeformConfig,
        services: SystemServices,
        adapter: FreeformDisplayAdapter,
        table: Weak<Mutex<WindowTable>>,
    ) -> Self {
        Self {
            id: WindowId::next(),
            app,
            config,
            client: ClientHandle::new(),
            services,
            adapter,
            table,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn key(&self) -> &FreeformKey {
        &self.app.key
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn config(&self) -> &FreeformConfig {
        &self.config
    }

    /// Handle of the backing display.
    pub fn display(&self) -> Option<ClientId> {
        self.state().display
    }

    /// Logical id of the backing display, once the host added it.
    pub fn display_id(&self) -> Option<u32> {
        self.state().display_id
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.state().task_id
    }

    pub fn view(&self) -> Option<ViewId> {
        self.state().view
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the window view and its backing display.
    ///
    /// On failure, whatever was created is torn down again.
    pub(super) fn start(self: &Arc<Self>) -> Result<()> {
        let _span = tracy_client::span!("FreeformWindow::start");

        let view = self
            .services
            .windows
            .create_view(&self.app, &self.config)
            .context("error creating freeform view")?;
        self.state().view = Some(view.id);

        let params = FreeformParams {
            name: self.app.key.to_string(),
            width: self.config.freeform_width,
            height: self.config.freeform_height,
            density_dpi: self.config.density_dpi,
            refresh_rate: self.config.refresh_rate,
            presentation_deadline_nanos: self.config.presentation_deadline_nanos,
            flags: self.config.flags,
        };

        // Displays are keyed by their owner.
        self.state().display = Some(self.client.id());

        let callback: Arc<dyn DisplayCallback> = self.clone();
        if let Err(err) = self
            .adapter
            .create_freeform(params, callback, Some(view.surface))
        {
            self.destroy();
            return Err(err);
        }

        debug!("started freeform window {}", self.app.key);
        Ok(())
    }

    /// Puts the app on the display, according to the launch descriptor.
    ///
    /// Returns the task now hosted on the display, if known.
    fn launch(&self, display_id: u32) -> anyhow::Result<Option<TaskId>> {
        let tasks = &self.services.tasks;

        if let Some(task) = self.app.task_id {
            debug!("moving task {task} to freeform display {display_id}");
            match tasks.move_task_to_display(task, display_id) {
                Ok(()) => return Ok(Some(task)),
                Err(err) => {
                    warn!("error moving task {task}, starting {} instead: {err:?}", self.app.key);
                }
            }
        } else if let Some(token) = &self.app.pending_launch {
            tasks.send_pending_launch(token, display_id)?;
            return Ok(None);
        }

        tasks.start_activity(&self.app, display_id)
    }

    /// Removes the hosted task, falling back to destroying the window.
    pub fn close(&self) {
        let _span = tracy_client::span!("FreeformWindow::close");

        let task = self.state().task_id;
        let res = match task {
            Some(task) => self.services.tasks.remove_task(task),
            None => Err(anyhow::anyhow!("no task known")),
        };

        if let Err(err) = res {
            warn!("error closing {}, destroying instead: {err:?}", self.app.key);
            self.destroy();
        }
    }

    /// Removes the view and releases the backing display. Only the first call does anything.
    pub fn destroy(&self) {
        let _span = tracy_client::span!("FreeformWindow::destroy");

        let (view, display) = {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            (state.view.take(), state.display.take())
        };

        debug!("destroying freeform window {}", self.app.key);

        if let Some(view) = view {
            self.services.windows.remove_view(view);
        }
        if let Some(display) = display {
            self.adapter.release_freeform(display);
        }
        self.client.disconnect();
    }

    /// Injects input given in window coordinates into the backing display.
    pub fn inject(&self, event: InputEvent) -> Result<()> {
        let Some(display_id) = self.display_id() else {
            return Err(Error::invalid(format!(
                "freeform window {} has no display yet",
                self.app.key
            )));
        };

        self.services
            .input
            .inject(display_id, event.scaled(self.config.scale))?;
        Ok(())
    }

    /// Whether the task change takes the app out of this window.
    pub(super) fn loses_task(&self, event: TaskEvent) -> bool {
        let state = self.state();
        if state.destroyed {
            return false;
        }

        match event {
            TaskEvent::Removed(task) => state.task_id == Some(task),
            TaskEvent::DisplayChanged { task, display_id } => {
                state.task_id == Some(task) && state.display_id != Some(display_id)
            }
        }
    }

    /// Takes the window out of its table, unless something else took its slot already.
    fn remove_from_table(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if table.get(&self.app.key).is_some_and(|w| w.id == self.id) {
            table.remove(&self.app.key);
        }
    }
}

impl DisplayCallback for FreeformWindow {
    fn client(&self) -> &ClientHandle {
        &self.client
    }

    fn on_display_added(&self, display_id: u32) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FreeformWindow::on_display_added");

        info!("freeform display {display_id} added for {}", self.app.key);
        {
            let mut state = self.state();
            if state.destroyed {
                return Ok(());
            }
            state.display_id = Some(display_id);
        }

        let task = match self.launch(display_id) {
            Ok(task) => task,
            Err(err) => {
                self.remove_from_table();
                self.destroy();
                return Err(err.context(format!("error launching {}", self.app.key)));
            }
        };

        {
            let mut state = self.state();
            if !state.destroyed {
                state.task_id = task;
                return Ok(());
            }
        }

        // Nothing closes the task of a destroyed window.
        if let Some(task) = task {
            debug!("{} went away while launching, removing task {task}", self.app.key);
            self.services
                .tasks
                .remove_task(task)
                .with_context(|| format!("error removing task {task}"))?;
        }
        Ok(())
    }

    fn on_display_paused(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_display_resumed(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_display_stopped(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
