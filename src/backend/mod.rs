//! Interfaces to the host the freeform displays live in.
//!
//! The display subsystem, the compositor transactions, input delivery and app launching all
//! belong to the host. Each is reached through a trait here; [`Headless`] implements all of them
//! in memory.

use std::fmt;
use std::sync::Arc;

use freeform_ipc::InputEvent;

use crate::display::DeviceEvent;
use crate::window::{AppConfig, FreeformConfig};

pub mod headless;

pub use headless::Headless;

/// Host-side display object backing one freeform display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayToken(pub u64);

impl fmt::Display for DisplayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

pub type TaskId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// The host display subsystem.
///
/// Called with the display registry lock held: implementations must not call back into the
/// registry.
pub trait DisplayHost: Send + Sync {
    /// Allocates a compositor display object.
    fn create_display(
        &self,
        unique_id: &str,
        secure: bool,
        refresh_rate: f32,
    ) -> anyhow::Result<DisplayToken>;
    fn destroy_display(&self, token: DisplayToken);
    /// Receives device added, changed and removed events.
    fn device_event(&self, event: DeviceEvent);
    /// Asks the host to run a traversal soon.
    fn request_traversal(&self);
    /// Logical display id the host assigned to a device, once it has picked the device up.
    fn logical_display_id(&self, token: DisplayToken) -> Option<u32>;
}

/// Compositor transaction filled in during a traversal.
pub trait Transaction {
    fn set_display_size(&mut self, token: DisplayToken, width: u32, height: u32);
    fn set_display_surface(&mut self, token: DisplayToken, surface: Option<&dyn RenderTarget>);
}

/// A surface a display renders into. Owned by exactly one display at a time.
pub trait RenderTarget: Send {
    fn name(&self) -> &str;
    /// Gives the surface back to its producer. Called at most once.
    fn release(&mut self);
}

/// Resolves named surfaces sent over the control socket.
pub trait SurfaceProvider: Send + Sync {
    fn open_surface(&self, name: &str) -> anyhow::Result<Box<dyn RenderTarget>>;
}

/// Lookup of the host services windows depend on.
pub trait ServiceManager: Send + Sync {
    fn input(&self) -> Option<Arc<dyn InputService>>;
    fn tasks(&self) -> Option<Arc<dyn TaskService>>;
    fn windows(&self) -> Option<Arc<dyn WindowService>>;
}

pub trait InputService: Send + Sync {
    fn inject(&self, display_id: u32, event: InputEvent) -> anyhow::Result<()>;
}

/// Change to a task, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// The task is gone, usually because its app finished.
    Removed(TaskId),
    /// The task now lives on another display.
    DisplayChanged { task: TaskId, display_id: u32 },
}

/// Receiver of [`TaskEvent`]s.
///
/// May run on any thread, including inside a [`TaskService`] call, so it must not block.
pub type TaskListener = Arc<dyn Fn(TaskEvent) + Send + Sync>;

/// Activity and task management.
pub trait TaskService: Send + Sync {
    /// Starts the activity on a display, returning the task hosting it if known.
    fn start_activity(&self, app: &AppConfig, display_id: u32) -> anyhow::Result<Option<TaskId>>;
    /// Fires a deferred launch token with the display as launch target.
    fn send_pending_launch(&self, token: &str, display_id: u32) -> anyhow::Result<()>;
    fn move_task_to_display(&self, task: TaskId, display_id: u32) -> anyhow::Result<()>;
    fn remove_task(&self, task: TaskId) -> anyhow::Result<()>;
    /// Registers a listener for changes to any task.
    fn add_task_listener(&self, listener: TaskListener);
}

/// Geometry of the host's default display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultDisplay {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f32,
    pub presentation_deadline_nanos: i64,
}

/// Window chrome hosting a freeform display.
pub struct FreeformView {
    pub id: ViewId,
    /// Surface the backing display renders into.
    pub surface: Box<dyn RenderTarget>,
}

pub trait WindowService: Send + Sync {
    fn default_display(&self) -> DefaultDisplay;
    fn create_view(&self, app: &AppConfig, config: &FreeformConfig)
        -> anyhow::Result<FreeformView>;
    fn remove_view(&self, view: ViewId);
}
