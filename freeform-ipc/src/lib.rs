//! Types for communicating with the freeform display service over its control socket.
//!
//! The service listens on a Unix domain socket whose path is exported in the `$FREEFORM_SOCKET`
//! environment variable. The protocol is line based: every message is a single line of JSON.
//!
//! Clients send [`Request`]s. The service answers every request with exactly one
//! [`ServerMessage::Reply`], in order. In between, it may push [`ServerMessage::Event`]s
//! describing the lifecycle of displays that were created over the same connection.
//!
//! Displays created over a connection are owned by that connection: once it closes, the service
//! tears them down as if the owning client died.
//!
//! You can use the [`socket::Socket`] helper if you're fine with blocking communication.
#![warn(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod socket;

/// Name of the environment variable containing the control socket path.
pub const SOCKET_PATH_ENV: &str = "FREEFORM_SOCKET";

/// Request from a client to the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Request {
    /// Request the version string of the running service.
    Version,
    /// Check whether the host services the service depends on are available.
    Ping,
    /// List the freeform displays that currently exist.
    Displays,
    /// Create a virtual freeform display owned by this connection.
    CreateFreeform(CreateFreeform),
    /// Change the geometry of a display.
    ResizeFreeform {
        /// Handle returned by [`Response::Created`].
        handle: u64,
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
        /// New density in dots per inch.
        density_dpi: u32,
    },
    /// Replace, attach or detach the render target of a display.
    SetFreeformSurface {
        /// Handle returned by [`Response::Created`].
        handle: u64,
        /// Name of the new render target; `None` detaches and pauses the display.
        surface: Option<String>,
    },
    /// Tear down a display.
    ReleaseFreeform {
        /// Handle returned by [`Response::Created`].
        handle: u64,
    },
    /// Open an application in a new freeform window.
    StartAppInFreeform(StartApp),
    /// Remove the freeform window for an application, if there is one.
    RemoveFreeform {
        /// Application identity of the window.
        key: FreeformKey,
    },
    /// Inject an input event into a display.
    InjectInput {
        /// Logical id of the target display.
        display_id: u32,
        /// The event to inject.
        event: InputEvent,
    },
}

/// Parameters of [`Request::CreateFreeform`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateFreeform {
    /// Display name; the service derives the unique id from it.
    pub name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Density in dots per inch.
    pub density_dpi: u32,
    /// Whether the display may show secure content.
    pub secure: bool,
    /// Whether the display only shows its own content (no mirroring).
    pub own_content_only: bool,
    /// Whether system decorations should be shown on the display.
    pub should_show_system_decorations: bool,
    /// Name of the render target to bind, if any.
    pub surface: Option<String>,
    /// Refresh rate in Hz.
    pub refresh_rate: f32,
    /// User the display is created for.
    pub user_id: i32,
}

/// Parameters of [`Request::StartAppInFreeform`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StartApp {
    /// Package of the application.
    pub package_name: String,
    /// Activity to launch.
    pub activity_name: String,
    /// User to launch the application as.
    pub user_id: i32,
    /// Opaque deferred-launch token to fire instead of starting the activity.
    pub pending_launch: Option<String>,
    /// Existing task to move into the window instead of starting the activity.
    pub task_id: Option<i32>,
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
    /// Window density in dots per inch.
    pub density_dpi: u32,
    /// Whether the backing display may show secure content.
    pub secure: bool,
    /// Whether the backing display only shows its own content.
    pub own_content_only: bool,
    /// Whether system decorations should be shown on the backing display.
    pub should_show_system_decorations: bool,
    /// Package holding the window decoration resources.
    pub resource_package: Option<String>,
    /// Layout used for the window decoration.
    pub layout_name: Option<String>,
}

/// Reply from the service to a request.
///
/// Every request gets one reply.
///
/// * If an error had occurred, it will be an `Reply::Err`.
/// * If the request does not need any particular response, it will be
///   `Reply::Ok(Response::Handled)`. Kind of like an `Ok(())`.
/// * Otherwise, it will be `Reply::Ok(response)` with one of the other [`Response`] variants.
pub type Reply = Result<Response, String>;

/// Successful response from the service to a request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Response {
    /// A request that does not need a response was handled successfully.
    Handled,
    /// The version string for the running service.
    Version(String),
    /// Whether the host services are available.
    Ping(bool),
    /// A display was created.
    Created {
        /// Handle to refer to the display in later requests.
        handle: u64,
    },
    /// A freeform window was started.
    Started {
        /// Application identity of the window.
        key: FreeformKey,
    },
    /// Information about the existing displays.
    Displays(Vec<Display>),
}

/// Lifecycle notification about a display owned by the connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Event {
    /// The host assigned a logical display id to the display.
    DisplayAdded {
        /// Handle of the display.
        handle: u64,
        /// Logical display id, usable with [`Request::InjectInput`].
        display_id: u32,
    },
    /// The display lost its render target.
    DisplayPaused {
        /// Handle of the display.
        handle: u64,
    },
    /// The display got a render target again.
    DisplayResumed {
        /// Handle of the display.
        handle: u64,
    },
    /// The display was torn down.
    DisplayStopped {
        /// Handle of the display.
        handle: u64,
    },
}

/// A single line sent by the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerMessage {
    /// Reply to the oldest unanswered request.
    Reply(Reply),
    /// Unsolicited lifecycle event.
    Event(Event),
}

/// A freeform display.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Display {
    /// Handle of the display.
    pub handle: u64,
    /// Unique id of the display.
    pub unique_id: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Density in dots per inch.
    pub density_dpi: u32,
    /// Refresh rate in Hz.
    pub refresh_rate: f32,
    /// Logical display id, once the host assigned one.
    pub logical_id: Option<u32>,
    /// Whether the display currently has no render target.
    pub paused: bool,
}

/// Input event to inject into a display.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Touch or pointer motion, in display coordinates.
    Motion {
        /// Phase of the gesture.
        action: MotionAction,
        /// Horizontal position.
        x: f32,
        /// Vertical position.
        y: f32,
    },
    /// Key press or release.
    Key {
        /// Host key code.
        keycode: u32,
        /// Whether the key was pressed (`true`) or released.
        pressed: bool,
    },
}

/// Phase of a motion event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    /// First contact.
    Down,
    /// Movement while in contact.
    Move,
    /// Contact lifted.
    Up,
    /// Gesture aborted.
    Cancel,
}

impl InputEvent {
    /// Returns the event with its coordinates multiplied by `scale`.
    pub fn scaled(self, scale: f32) -> Self {
        match self {
            InputEvent::Motion { action, x, y } => InputEvent::Motion {
                action,
                x: x * scale,
                y: y * scale,
            },
            key @ InputEvent::Key { .. } => key,
        }
    }
}

/// Identity of an application target: package, activity and user.
///
/// Written as `package,activity,user` in text form.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct FreeformKey {
    /// Package of the application.
    pub package_name: String,
    /// Activity of the application.
    pub activity_name: String,
    /// User the application runs as.
    pub user_id: i32,
}

impl FreeformKey {
    /// Creates a key.
    pub fn new(package_name: impl Into<String>, activity_name: impl Into<String>, user_id: i32) -> Self {
        Self {
            package_name: package_name.into(),
            activity_name: activity_name.into(),
            user_id,
        }
    }
}

impl fmt::Display for FreeformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.package_name, self.activity_name, self.user_id)
    }
}

/// Error parsing a [`FreeformKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError(String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid freeform key {:?}, expected package,activity,user", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for FreeformKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_owned());

        let (rest, user) = s.rsplit_once(',').ok_or_else(err)?;
        let (package, activity) = rest.split_once(',').ok_or_else(err)?;
        if package.is_empty() || activity.is_empty() {
            return Err(err());
        }
        let user_id = user.trim().parse().map_err(|_| err())?;

        Ok(Self::new(package, activity, user_id))
    }
}

impl TryFrom<String> for FreeformKey {
    type Error = ParseKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FreeformKey> for String {
    fn from(value: FreeformKey) -> Self {
        value.to_string()
    }
}
