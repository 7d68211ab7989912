//! A single virtual freeform display.

use std::fmt;

use super::types::{
    DeviceInfoFlags, DisplayDeviceInfo, DisplayKind, DisplayMode, DisplayShape, FreeformFlags,
    PendingChanges, TouchKind,
};
use crate::backend::{DisplayHost, DisplayToken, RenderTarget, Transaction};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Capabilities the registry needs from a display device.
pub trait DisplayDevice: Send {
    fn token(&self) -> DisplayToken;
    /// Current info snapshot, rebuilt if anything changed since the last call.
    fn info(&mut self) -> &DisplayDeviceInfo;
    /// Pushes pending changes into the transaction and clears them.
    fn apply_pending_changes(&mut self, tx: &mut dyn Transaction);
    /// Releases the render target and destroys the host display object.
    fn teardown(&mut self, host: &dyn DisplayHost);
}

/// Creation parameters of a freeform display.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeformParams {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub refresh_rate: f32,
    /// Base presentation deadline; the info snapshot adds one frame period on top.
    pub presentation_deadline_nanos: i64,
    pub flags: FreeformFlags,
}

pub struct FreeformDisplayDevice {
    token: DisplayToken,
    name: String,
    unique_id: String,
    width: u32,
    height: u32,
    density_dpi: u32,
    refresh_rate: f32,
    presentation_deadline_nanos: i64,
    flags: FreeformFlags,
    mode: DisplayMode,
    surface: Option<Box<dyn RenderTarget>>,
    pending: PendingChanges,
    info: Option<DisplayDeviceInfo>,
    torn_down: bool,
}

impl FreeformDisplayDevice {
    pub fn new(
        token: DisplayToken,
        unique_id: String,
        params: FreeformParams,
        surface: Option<Box<dyn RenderTarget>>,
    ) -> Self {
        let mode = DisplayMode::new(params.width, params.height, params.refresh_rate);
        Self {
            token,
            name: params.name,
            unique_id,
            width: params.width,
            height: params.height,
            density_dpi: params.density_dpi,
            refresh_rate: params.refresh_rate,
            presentation_deadline_nanos: params.presentation_deadline_nanos,
            flags: params.flags,
            mode,
            surface,
            pending: PendingChanges::SURFACE_CHANGED,
            info: None,
            torn_down: false,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn density_dpi(&self) -> u32 {
        self.density_dpi
    }

    pub fn refresh_rate(&self) -> f32 {
        self.refresh_rate
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn pending_changes(&self) -> PendingChanges {
        self.pending
    }

    /// Whether the display currently has no render target.
    pub fn is_paused(&self) -> bool {
        self.surface.is_none()
    }

    /// Whether the info snapshot is cached.
    pub fn has_cached_info(&self) -> bool {
        self.info.is_some()
    }

    /// Changes the geometry. Returns `false` and leaves everything untouched if nothing changed.
    pub fn resize(&mut self, width: u32, height: u32, density_dpi: u32) -> bool {
        if self.width == width && self.height == height && self.density_dpi == density_dpi {
            return false;
        }

        self.width = width;
        self.height = height;
        self.density_dpi = density_dpi;
        self.mode = DisplayMode::new(width, height, self.refresh_rate);
        self.pending |= PendingChanges::RESIZE;
        self.info = None;
        true
    }

    /// Replaces the render target, releasing the previous one.
    pub fn set_surface(&mut self, surface: Option<Box<dyn RenderTarget>>) {
        if let Some(mut old) = self.surface.take() {
            old.release();
        }
        self.surface = surface;
        self.pending |= PendingChanges::SURFACE_CHANGED;
        self.info = None;
    }

    fn frame_period_nanos(&self) -> i64 {
        // Truncated to whole Hz; creation rejects rates below 1.
        NANOS_PER_SECOND / (self.refresh_rate as i64).max(1)
    }

    fn build_info(&self) -> DisplayDeviceInfo {
        let dpi = self.density_dpi as f32;
        DisplayDeviceInfo {
            name: self.name.clone(),
            unique_id: self.unique_id.clone(),
            width: self.width,
            height: self.height,
            mode_id: self.mode.id,
            default_mode_id: self.mode.id,
            supported_modes: vec![self.mode],
            density_dpi: self.density_dpi,
            x_dpi: dpi,
            y_dpi: dpi,
            presentation_deadline_nanos: self
                .presentation_deadline_nanos
                .saturating_add(self.frame_period_nanos()),
            flags: self.flags.info_flags(),
            kind: DisplayKind::Overlay,
            touch: TouchKind::Virtual,
            shape: DisplayShape {
                width: self.width,
                height: self.height,
            },
        }
    }

    pub fn info_flags(&self) -> DeviceInfoFlags {
        self.flags.info_flags()
    }
}

impl DisplayDevice for FreeformDisplayDevice {
    fn token(&self) -> DisplayToken {
        self.token
    }

    fn info(&mut self) -> &DisplayDeviceInfo {
        let info = match self.info.take() {
            Some(info) => info,
            None => self.build_info(),
        };
        self.info.insert(info)
    }

    fn apply_pending_changes(&mut self, tx: &mut dyn Transaction) {
        if self.torn_down {
            return;
        }

        if self.pending.contains(PendingChanges::RESIZE) {
            tx.set_display_size(self.token, self.width, self.height);
        }
        if self.pending.contains(PendingChanges::SURFACE_CHANGED) {
            tx.set_display_surface(self.token, self.surface.as_deref());
        }
        self.pending = PendingChanges::empty();
    }

    fn teardown(&mut self, host: &dyn DisplayHost) {
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }

        if !self.torn_down {
            self.torn_down = true;
            host.destroy_display(self.token);
        }
    }
}

impl fmt::Debug for FreeformDisplayDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeformDisplayDevice")
            .field("token", &self.token)
            .field("unique_id", &self.unique_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("density_dpi", &self.density_dpi)
            .field("surface", &self.surface.as_ref().map(|s| s.name().to_owned()))
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use super::*;
    use crate::backend::headless::{Headless, HeadlessTransaction, TransactionOp};

    fn params() -> FreeformParams {
        FreeformParams {
            name: String::from("test"),
            width: 1280,
            height: 720,
            density_dpi: 320,
            refresh_rate: 60.,
            presentation_deadline_nanos: 1_666_666,
            flags: FreeformFlags {
                secure: true,
                ..FreeformFlags::default()
            },
        }
    }

    fn device(headless: &Headless) -> FreeformDisplayDevice {
        let surface = headless.surface("surface-0");
        FreeformDisplayDevice::new(
            DisplayToken(1),
            String::from("freeform:test"),
            params(),
            Some(Box::new(surface)),
        )
    }

    #[test]
    fn info_snapshot() {
        let headless = Headless::new();
        let mut device = device(&headless);

        let mut info = device.info().clone();
        assert_eq!(info.mode_id, device.mode().id);
        assert_eq!(info.default_mode_id, info.mode_id);

        // Mode ids are process-global.
        info.mode_id = 0;
        info.default_mode_id = 0;
        info.supported_modes[0].id = 0;

        assert_debug_snapshot!(info, @r#"
        DisplayDeviceInfo {
            name: "test",
            unique_id: "freeform:test",
            width: 1280,
            height: 720,
            mode_id: 0,
            default_mode_id: 0,
            supported_modes: [
                DisplayMode {
                    id: 0,
                    width: 1280,
                    height: 720,
                    refresh_rate: 60.0,
                },
            ],
            density_dpi: 320,
            x_dpi: 320.0,
            y_dpi: 320.0,
            presentation_deadline_nanos: 18333332,
            flags: DeviceInfoFlags(
                SECURE | TRUSTED,
            ),
            kind: Overlay,
            touch: Virtual,
            shape: DisplayShape {
                width: 1280,
                height: 720,
            },
        }
        "#);
    }

    #[test]
    fn deadline_uses_whole_hz() {
        let headless = Headless::new();
        let mut device = FreeformDisplayDevice::new(
            DisplayToken(1),
            String::from("freeform:test"),
            FreeformParams {
                refresh_rate: 59.94,
                presentation_deadline_nanos: 0,
                ..params()
            },
            Some(Box::new(headless.surface("surface-0"))),
        );
        assert_eq!(device.info().presentation_deadline_nanos, 1_000_000_000 / 59);
    }

    #[test]
    fn huge_deadline_saturates() {
        let headless = Headless::new();
        let mut device = FreeformDisplayDevice::new(
            DisplayToken(1),
            String::from("freeform:test"),
            FreeformParams {
                presentation_deadline_nanos: i64::MAX - 1,
                ..params()
            },
            Some(Box::new(headless.surface("surface-0"))),
        );
        assert_eq!(device.info().presentation_deadline_nanos, i64::MAX);
    }

    #[test]
    fn new_device_has_surface_pending() {
        let headless = Headless::new();
        let device = device(&headless);
        assert_eq!(device.pending_changes(), PendingChanges::SURFACE_CHANGED);
    }

    #[test]
    fn unchanged_resize_does_nothing() {
        let headless = Headless::new();
        let mut device = device(&headless);
        let mode = device.mode();
        device.info();

        assert!(!device.resize(1280, 720, 320));
        assert_eq!(device.mode(), mode);
        assert_eq!(device.pending_changes(), PendingChanges::SURFACE_CHANGED);
        assert!(device.has_cached_info());
    }

    #[test]
    fn resize_allocates_mode_and_invalidates_info() {
        let headless = Headless::new();
        let mut device = device(&headless);
        let mode = device.mode();
        device.info();

        assert!(device.resize(800, 600, 240));
        assert_ne!(device.mode().id, mode.id);
        assert!(device.pending_changes().contains(PendingChanges::RESIZE));
        assert!(!device.has_cached_info());

        let info = device.info();
        assert_eq!((info.width, info.height, info.density_dpi), (800, 600, 240));
        assert_eq!(info.shape, DisplayShape { width: 800, height: 600 });
    }

    #[test]
    fn traversal_clears_pending_changes() {
        let headless = Headless::new();
        let mut device = device(&headless);
        device.resize(800, 600, 240);

        let mut tx = HeadlessTransaction::default();
        device.apply_pending_changes(&mut tx);
        assert_eq!(
            tx.ops(),
            [
                TransactionOp::SetSize {
                    token: DisplayToken(1),
                    width: 800,
                    height: 600,
                },
                TransactionOp::SetSurface {
                    token: DisplayToken(1),
                    surface: Some(String::from("surface-0")),
                },
            ]
        );
        assert_eq!(device.pending_changes(), PendingChanges::empty());

        let mut tx = HeadlessTransaction::default();
        device.apply_pending_changes(&mut tx);
        assert!(tx.ops().is_empty());
    }

    #[test]
    fn replacing_surface_releases_old_one() {
        let headless = Headless::new();
        let mut device = device(&headless);

        device.set_surface(Some(Box::new(headless.surface("surface-1"))));
        assert_eq!(headless.released_surfaces(), ["surface-0"]);
        assert!(!device.is_paused());

        device.set_surface(None);
        assert_eq!(headless.released_surfaces(), ["surface-0", "surface-1"]);
        assert!(device.is_paused());
    }

    #[test]
    fn teardown_releases_once() {
        let headless = Headless::new();
        let mut device = device(&headless);

        device.teardown(&headless);
        device.teardown(&headless);

        assert_eq!(headless.released_surfaces(), ["surface-0"]);
        assert_eq!(headless.destroyed_displays(), [DisplayToken(1)]);
    }
}
