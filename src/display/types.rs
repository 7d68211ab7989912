//! Plain data types of the display subsystem.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::backend::DisplayToken;

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Flags reported in a display info snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceInfoFlags: u32 {
        const SECURE = 1 << 2;
        const OWN_CONTENT_ONLY = 1 << 7;
        const SHOULD_SHOW_SYSTEM_DECORATIONS = 1 << 12;
        const TRUSTED = 1 << 13;
    }
}

bitflags! {
    /// Changes not yet pushed to the compositor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PendingChanges: u8 {
        const SURFACE_CHANGED = 1 << 0;
        const RESIZE = 1 << 1;
    }
}

/// Behavior flags requested when creating a freeform display.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FreeformFlags {
    pub secure: bool,
    pub own_content_only: bool,
    pub should_show_system_decorations: bool,
}

impl FreeformFlags {
    /// Info flags for a display created with these flags. Freeform displays are always trusted.
    pub fn info_flags(self) -> DeviceInfoFlags {
        let mut flags = DeviceInfoFlags::TRUSTED;
        flags.set(DeviceInfoFlags::SECURE, self.secure);
        flags.set(DeviceInfoFlags::OWN_CONTENT_ONLY, self.own_content_only);
        flags.set(
            DeviceInfoFlags::SHOULD_SHOW_SYSTEM_DECORATIONS,
            self.should_show_system_decorations,
        );
        flags
    }
}

// =============================================================================
// Modes and info
// =============================================================================

static MODE_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// A display mode. Every distinct geometry gets a fresh, process-unique mode id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMode {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh_rate: f32) -> Self {
        Self {
            id: MODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            refresh_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    Virtual,
}

/// Outline of the display area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayShape {
    pub width: u32,
    pub height: u32,
}

/// Snapshot of a display's configuration as the host sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDeviceInfo {
    pub name: String,
    pub unique_id: String,
    pub width: u32,
    pub height: u32,
    pub mode_id: u32,
    pub default_mode_id: u32,
    pub supported_modes: Vec<DisplayMode>,
    pub density_dpi: u32,
    pub x_dpi: f32,
    pub y_dpi: f32,
    pub presentation_deadline_nanos: i64,
    pub flags: DeviceInfoFlags,
    pub kind: DisplayKind,
    pub touch: TouchKind,
    pub shape: DisplayShape,
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Added,
    Changed,
    Removed,
}

/// Notification from the display registry to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub token: DisplayToken,
    pub unique_id: String,
    /// Info snapshot at the time of the event; `None` for removals.
    pub info: Option<DisplayDeviceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_composition() {
        let flags = FreeformFlags {
            secure: true,
            own_content_only: false,
            should_show_system_decorations: true,
        };
        assert_eq!(
            flags.info_flags(),
            DeviceInfoFlags::SECURE
                | DeviceInfoFlags::SHOULD_SHOW_SYSTEM_DECORATIONS
                | DeviceInfoFlags::TRUSTED
        );

        assert_eq!(
            FreeformFlags::default().info_flags(),
            DeviceInfoFlags::TRUSTED
        );
    }

    #[test]
    fn mode_ids_are_unique() {
        let a = DisplayMode::new(100, 100, 60.);
        let b = DisplayMode::new(100, 100, 60.);
        assert_ne!(a.id, b.id);
    }
}
