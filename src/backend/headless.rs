//! In-memory host.
//!
//! Records everything the freeform service asks of its host. The daemon runs on it when there is
//! no real compositor, and tests use it to observe display and window behavior.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use anyhow::{bail, ensure};
use freeform_ipc::{FreeformKey, InputEvent};

use super::{
    DefaultDisplay, DisplayHost, DisplayToken, FreeformView, InputService, RenderTarget,
    ServiceManager, SurfaceProvider, TaskEvent, TaskId, TaskListener, TaskService, Transaction,
    ViewId, WindowService,
};
use crate::display::{DeviceEvent, DeviceEventKind, FreeformDisplayAdapter};
use crate::window::{AppConfig, FreeformConfig};

/// Logical id of the host's own default display; freeform displays are numbered after it.
pub const DEFAULT_DISPLAY_ID: u32 = 0;
const FIRST_LOGICAL_ID: u32 = 2;

/// Shared handle to the in-memory host. Clones refer to the same host.
#[derive(Clone)]
pub struct Headless {
    state: Arc<Mutex<HeadlessState>>,
    /// Kept apart from the state so that listeners run without the state lock.
    task_listeners: Arc<Mutex<Vec<TaskListener>>>,
    launch_gate: Arc<LaunchGate>,
}

/// Lets tests hold activity starts halfway through.
#[derive(Default)]
struct LaunchGate {
    state: Mutex<LaunchGateState>,
    released: Condvar,
}

#[derive(Default)]
struct LaunchGateState {
    held: bool,
    waiting: usize,
}

struct HeadlessState {
    services_available: bool,
    default_display: DefaultDisplay,

    next_token: u64,
    next_logical_id: u32,
    displays: BTreeMap<DisplayToken, HeadlessDisplay>,
    destroyed: Vec<DisplayToken>,
    events: Vec<DeviceEvent>,
    traversal_requested: bool,
    released_surfaces: Vec<String>,

    next_task: TaskId,
    tasks: BTreeMap<TaskId, HeadlessTask>,
    removed_tasks: Vec<TaskId>,
    pending_launches: Vec<(String, u32)>,

    next_view: u64,
    views: BTreeMap<ViewId, HeadlessView>,
    removed_views: Vec<ViewId>,

    injected: Vec<(u32, InputEvent)>,

    fail_display_creation: bool,
    fail_launches: bool,
    fail_views: bool,
}

/// A display object the host knows about.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessDisplay {
    pub unique_id: String,
    pub secure: bool,
    pub refresh_rate: f32,
    pub logical_id: Option<u32>,
    /// Size as last committed by a traversal.
    pub size: Option<(u32, u32)>,
    /// Surface as last committed by a traversal.
    pub surface: Option<String>,
}

/// Window chrome around a freeform display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessView {
    pub key: FreeformKey,
    /// Surface the view renders.
    pub surface: String,
    /// Decoration layout as `package/layout`, when the app asked for a custom one.
    pub layout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessTask {
    pub key: FreeformKey,
    pub display_id: u32,
}

impl Default for HeadlessState {
    fn default() -> Self {
        Self {
            services_available: true,
            default_display: DefaultDisplay {
                width: 1080,
                height: 2340,
                refresh_rate: 60.,
                presentation_deadline_nanos: 16_666_666,
            },
            next_token: 1,
            next_logical_id: FIRST_LOGICAL_ID,
            displays: BTreeMap::new(),
            destroyed: Vec::new(),
            events: Vec::new(),
            traversal_requested: false,
            released_surfaces: Vec::new(),
            next_task: 1,
            tasks: BTreeMap::new(),
            removed_tasks: Vec::new(),
            pending_launches: Vec::new(),
            next_view: 1,
            views: BTreeMap::new(),
            removed_views: Vec::new(),
            injected: Vec::new(),
            fail_display_creation: false,
            fail_launches: false,
            fail_views: false,
        }
    }
}

// =============================================================================
// Surfaces and transactions
// =============================================================================

/// Named surface that reports its release back to the host.
pub struct HeadlessSurface {
    name: String,
    state: Arc<Mutex<HeadlessState>>,
}

impl RenderTarget for HeadlessSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) {
        lock(&self.state).released_surfaces.push(self.name.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
    SetSize {
        token: DisplayToken,
        width: u32,
        height: u32,
    },
    SetSurface {
        token: DisplayToken,
        surface: Option<String>,
    },
}

/// Transaction collecting operations to commit once the traversal is done.
#[derive(Debug, Default)]
pub struct HeadlessTransaction {
    ops: Vec<TransactionOp>,
}

impl HeadlessTransaction {
    pub fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }
}

impl Transaction for HeadlessTransaction {
    fn set_display_size(&mut self, token: DisplayToken, width: u32, height: u32) {
        self.ops.push(TransactionOp::SetSize {
            token,
            width,
            height,
        });
    }

    fn set_display_surface(&mut self, token: DisplayToken, surface: Option<&dyn RenderTarget>) {
        self.ops.push(TransactionOp::SetSurface {
            token,
            surface: surface.map(|s| s.name().to_owned()),
        });
    }
}

fn lock(state: &Mutex<HeadlessState>) -> MutexGuard<'_, HeadlessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Headless
// =============================================================================

impl Headless {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState::default())),
            task_listeners: Arc::new(Mutex::new(Vec::new())),
            launch_gate: Arc::new(LaunchGate::default()),
        }
    }

    /// Host whose services are not available until [`Self::set_services_available`].
    pub fn without_services() -> Self {
        let headless = Self::new();
        headless.set_services_available(false);
        headless
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        lock(&self.state)
    }

    pub fn surface(&self, name: &str) -> HeadlessSurface {
        HeadlessSurface {
            name: name.to_owned(),
            state: self.state.clone(),
        }
    }

    /// Runs a traversal over the adapter and commits the resulting transaction.
    pub fn traverse(&self, adapter: &FreeformDisplayAdapter) {
        let _span = tracy_client::span!("Headless::traverse");

        let mut tx = HeadlessTransaction::default();
        self.state().traversal_requested = false;
        adapter.perform_traversal(&mut tx);
        self.commit(tx);
    }

    pub fn commit(&self, tx: HeadlessTransaction) {
        let mut state = self.state();
        for op in tx.ops {
            let token = match &op {
                TransactionOp::SetSize { token, .. } | TransactionOp::SetSurface { token, .. } => {
                    *token
                }
            };
            let Some(display) = state.displays.get_mut(&token) else {
                warn!("transaction for unknown display {token}");
                continue;
            };

            match op {
                TransactionOp::SetSize { width, height, .. } => display.size = Some((width, height)),
                TransactionOp::SetSurface { surface, .. } => display.surface = surface,
            }
        }
    }

    // =========================================================================
    // Knobs
    // =========================================================================

    pub fn set_services_available(&self, available: bool) {
        self.state().services_available = available;
    }

    pub fn set_default_display(&self, display: DefaultDisplay) {
        self.state().default_display = display;
    }

    pub fn fail_display_creation(&self, fail: bool) {
        self.state().fail_display_creation = fail;
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state().fail_launches = fail;
    }

    pub fn fail_views(&self, fail: bool) {
        self.state().fail_views = fail;
    }

    /// Makes activity starts wait until released again.
    pub fn hold_launches(&self, hold: bool) {
        let gate = &self.launch_gate;
        gate.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .held = hold;
        gate.released.notify_all();
    }

    /// Number of activity starts waiting on [`Self::hold_launches`].
    pub fn held_launches(&self) -> usize {
        self.launch_gate
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .waiting
    }

    fn pass_launch_gate(&self) {
        let gate = &self.launch_gate;
        let mut state = gate
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.waiting += 1;
        while state.held {
            state = gate
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.waiting -= 1;
    }

    fn notify_task_listeners(&self, event: TaskEvent) {
        let listeners = self
            .task_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener(event);
        }
    }

    // =========================================================================
    // Observations
    // =========================================================================

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    pub fn event_kinds(&self) -> Vec<DeviceEventKind> {
        self.state().events.iter().map(|e| e.kind).collect()
    }

    pub fn traversal_requested(&self) -> bool {
        self.state().traversal_requested
    }

    pub fn display(&self, token: DisplayToken) -> Option<HeadlessDisplay> {
        self.state().displays.get(&token).cloned()
    }

    /// Display objects that were created and not destroyed yet.
    pub fn live_displays(&self) -> Vec<DisplayToken> {
        self.state().displays.keys().copied().collect()
    }

    pub fn destroyed_displays(&self) -> Vec<DisplayToken> {
        self.state().destroyed.clone()
    }

    pub fn released_surfaces(&self) -> Vec<String> {
        self.state().released_surfaces.clone()
    }

    pub fn tasks(&self) -> BTreeMap<TaskId, HeadlessTask> {
        self.state().tasks.clone()
    }

    pub fn removed_tasks(&self) -> Vec<TaskId> {
        self.state().removed_tasks.clone()
    }

    pub fn pending_launches(&self) -> Vec<(String, u32)> {
        self.state().pending_launches.clone()
    }

    /// Views that exist.
    pub fn views(&self) -> BTreeMap<ViewId, HeadlessView> {
        self.state().views.clone()
    }

    pub fn removed_views(&self) -> Vec<ViewId> {
        self.state().removed_views.clone()
    }

    pub fn injected_input(&self) -> Vec<(u32, InputEvent)> {
        self.state().injected.clone()
    }

    /// Starts a task outside of any freeform window, as if the user opened an app normally.
    pub fn spawn_task(&self, key: FreeformKey) -> TaskId {
        let mut state = self.state();
        let task = state.next_task;
        state.next_task += 1;
        state.tasks.insert(
            task,
            HeadlessTask {
                key,
                display_id: DEFAULT_DISPLAY_ID,
            },
        );
        task
    }
}

impl Default for Headless {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayHost for Headless {
    fn create_display(
        &self,
        unique_id: &str,
        secure: bool,
        refresh_rate: f32,
    ) -> anyhow::Result<DisplayToken> {
        let mut state = self.state();
        ensure!(
            !state.fail_display_creation,
            "display creation disabled for {unique_id}"
        );

        let token = DisplayToken(state.next_token);
        state.next_token += 1;
        state.displays.insert(
            token,
            HeadlessDisplay {
                unique_id: unique_id.to_owned(),
                secure,
                refresh_rate,
                logical_id: None,
                size: None,
                surface: None,
            },
        );
        Ok(token)
    }

    fn destroy_display(&self, token: DisplayToken) {
        let mut state = self.state();
        if state.displays.remove(&token).is_none() {
            warn!("destroying unknown display {token}");
        }
        state.destroyed.push(token);
    }

    fn device_event(&self, event: DeviceEvent) {
        let mut state = self.state();
        if event.kind == DeviceEventKind::Added {
            let id = state.next_logical_id;
            if let Some(display) = state.displays.get_mut(&event.token) {
                display.logical_id = Some(id);
                state.next_logical_id += 1;
            }
        }
        state.events.push(event);
    }

    fn request_traversal(&self) {
        self.state().traversal_requested = true;
    }

    fn logical_display_id(&self, token: DisplayToken) -> Option<u32> {
        self.state().displays.get(&token)?.logical_id
    }
}

impl SurfaceProvider for Headless {
    fn open_surface(&self, name: &str) -> anyhow::Result<Box<dyn RenderTarget>> {
        ensure!(!name.is_empty(), "surface name must not be empty");
        Ok(Box::new(self.surface(name)))
    }
}

impl ServiceManager for Headless {
    fn input(&self) -> Option<Arc<dyn InputService>> {
        let available = self.state().services_available;
        available.then(|| Arc::new(self.clone()) as Arc<dyn InputService>)
    }

    fn tasks(&self) -> Option<Arc<dyn TaskService>> {
        let available = self.state().services_available;
        available.then(|| Arc::new(self.clone()) as Arc<dyn TaskService>)
    }

    fn windows(&self) -> Option<Arc<dyn WindowService>> {
        let available = self.state().services_available;
        available.then(|| Arc::new(self.clone()) as Arc<dyn WindowService>)
    }
}

impl InputService for Headless {
    fn inject(&self, display_id: u32, event: InputEvent) -> anyhow::Result<()> {
        let mut state = self.state();
        let known = display_id == DEFAULT_DISPLAY_ID
            || state
                .displays
                .values()
                .any(|d| d.logical_id == Some(display_id));
        ensure!(known, "no display with id {display_id}");

        state.injected.push((display_id, event));
        Ok(())
    }
}

impl TaskService for Headless {
    fn start_activity(&self, app: &AppConfig, display_id: u32) -> anyhow::Result<Option<TaskId>> {
        self.pass_launch_gate();

        let mut state = self.state();
        ensure!(!state.fail_launches, "failed to start {}", app.key);

        let task = state.next_task;
        state.next_task += 1;
        state.tasks.insert(
            task,
            HeadlessTask {
                key: app.key.clone(),
                display_id,
            },
        );
        Ok(Some(task))
    }

    fn send_pending_launch(&self, token: &str, display_id: u32) -> anyhow::Result<()> {
        let mut state = self.state();
        ensure!(!state.fail_launches, "failed to send pending launch {token}");
        state.pending_launches.push((token.to_owned(), display_id));
        Ok(())
    }

    fn move_task_to_display(&self, task: TaskId, display_id: u32) -> anyhow::Result<()> {
        {
            let mut state = self.state();
            let Some(t) = state.tasks.get_mut(&task) else {
                bail!("no task with id {task}");
            };
            t.display_id = display_id;
        }

        self.notify_task_listeners(TaskEvent::DisplayChanged { task, display_id });
        Ok(())
    }

    fn remove_task(&self, task: TaskId) -> anyhow::Result<()> {
        {
            let mut state = self.state();
            if state.tasks.remove(&task).is_none() {
                bail!("no task with id {task}");
            }
            state.removed_tasks.push(task);
        }

        self.notify_task_listeners(TaskEvent::Removed(task));
        Ok(())
    }

    fn add_task_listener(&self, listener: TaskListener) {
        self.task_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }
}

impl WindowService for Headless {
    fn default_display(&self) -> DefaultDisplay {
        self.state().default_display
    }

    fn create_view(
        &self,
        app: &AppConfig,
        _config: &FreeformConfig,
    ) -> anyhow::Result<FreeformView> {
        let mut state = self.state();
        ensure!(!state.fail_views, "failed to create a view for {}", app.key);

        let layout = match (&app.resource_package, &app.layout_name) {
            (Some(package), Some(layout)) => Some(format!("{package}/{layout}")),
            (None, None) => None,
            _ => bail!(
                "{}: decoration resources need both a package and a layout name",
                app.key
            ),
        };

        let id = ViewId(state.next_view);
        state.next_view += 1;
        let name = format!("view-{}", id.0);
        state.views.insert(
            id,
            HeadlessView {
                key: app.key.clone(),
                surface: name.clone(),
                layout,
            },
        );
        drop(state);

        Ok(FreeformView {
            id,
            surface: Box::new(self.surface(&name)),
        })
    }

    fn remove_view(&self, view: ViewId) {
        let mut state = self.state();
        if state.views.remove(&view).is_some() {
            state.removed_views.push(view);
        } else {
            warn!("removing unknown view {view:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_ids_assigned_on_add() {
        let headless = Headless::new();
        let token = headless.create_display("freeform:a", false, 60.).unwrap();
        assert_eq!(headless.logical_display_id(token), None);

        headless.device_event(DeviceEvent {
            kind: DeviceEventKind::Added,
            token,
            unique_id: String::from("freeform:a"),
            info: None,
        });
        assert_eq!(headless.logical_display_id(token), Some(FIRST_LOGICAL_ID));

        headless.destroy_display(token);
        assert_eq!(headless.logical_display_id(token), None);
        assert_eq!(headless.destroyed_displays(), [token]);
    }

    #[test]
    fn commit_ignores_unknown_displays() {
        let headless = Headless::new();
        let token = headless.create_display("freeform:a", false, 60.).unwrap();

        let mut tx = HeadlessTransaction::default();
        tx.set_display_size(token, 10, 20);
        tx.set_display_size(DisplayToken(99), 10, 20);
        headless.commit(tx);

        assert_eq!(headless.display(token).unwrap().size, Some((10, 20)));
    }

    #[test]
    fn services_follow_availability() {
        let headless = Headless::without_services();
        assert!(headless.input().is_none());
        assert!(ServiceManager::tasks(&headless).is_none());
        assert!(headless.windows().is_none());

        headless.set_services_available(true);
        assert!(headless.input().is_some());
        assert!(ServiceManager::tasks(&headless).is_some());
        assert!(headless.windows().is_some());
    }

    #[test]
    fn task_changes_reach_listeners() {
        let headless = Headless::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        headless.add_task_listener(Arc::new(move |event: TaskEvent| {
            sink.lock().unwrap().push(event);
        }));

        let task = headless.spawn_task(FreeformKey::new("a", ".Main", 0));
        headless.move_task_to_display(task, 5).unwrap();
        headless.remove_task(task).unwrap();
        assert!(headless.remove_task(task).is_err());

        assert_eq!(
            *events.lock().unwrap(),
            [
                TaskEvent::DisplayChanged {
                    task,
                    display_id: 5
                },
                TaskEvent::Removed(task),
            ]
        );
    }

    #[test]
    fn view_records_decoration_layout() {
        let headless = Headless::new();
        let config = FreeformConfig::new(540, 960, 320);

        let mut app = AppConfig::new(FreeformKey::new("a", ".Main", 0));
        let plain = headless.create_view(&app, &config).unwrap();

        app.resource_package = Some(String::from("org.example.chrome"));
        app.layout_name = Some(String::from("compact"));
        let decorated = headless.create_view(&app, &config).unwrap();

        let views = headless.views();
        assert_eq!(views[&plain.id].layout, None);
        assert_eq!(
            views[&decorated.id].layout.as_deref(),
            Some("org.example.chrome/compact")
        );
        assert_eq!(views[&decorated.id].surface, decorated.surface.name());

        app.layout_name = None;
        assert!(headless.create_view(&app, &config).is_err());
        assert_eq!(headless.views().len(), 2);
    }

    #[test]
    fn injection_needs_known_display() {
        let headless = Headless::new();
        let event = InputEvent::Key {
            keycode: 1,
            pressed: true,
        };
        assert!(headless.inject(DEFAULT_DISPLAY_ID, event).is_ok());
        assert!(headless.inject(42, event).is_err());
        assert_eq!(headless.injected_input(), [(DEFAULT_DISPLAY_ID, event)]);
    }
}
