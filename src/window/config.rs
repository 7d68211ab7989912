use freeform_ipc::FreeformKey;

use crate::backend::{DefaultDisplay, TaskId};
use crate::display::FreeformFlags;

/// What to launch in a freeform window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub key: FreeformKey,
    /// Deferred launch token to fire instead of starting the activity.
    pub pending_launch: Option<String>,
    /// Existing task to move into the window instead of starting the activity.
    pub task_id: Option<TaskId>,
    /// Package holding the window decoration resources. Set together with `layout_name`.
    pub resource_package: Option<String>,
    /// Decoration layout inside `resource_package`.
    pub layout_name: Option<String>,
}

impl AppConfig {
    pub fn new(key: FreeformKey) -> Self {
        Self {
            key,
            pending_launch: None,
            task_id: None,
            resource_package: None,
            layout_name: None,
        }
    }
}

/// Geometry of a freeform window and its backing display.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeformConfig {
    /// Window size on the default display.
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub flags: FreeformFlags,
    pub refresh_rate: f32,
    pub presentation_deadline_nanos: i64,
    /// Size of the backing display.
    pub freeform_width: u32,
    pub freeform_height: u32,
    /// Backing display size divided by window size.
    pub scale: f32,
}

impl FreeformConfig {
    pub fn new(width: u32, height: u32, density_dpi: u32) -> Self {
        Self {
            width,
            height,
            density_dpi,
            flags: FreeformFlags {
                secure: true,
                own_content_only: true,
                should_show_system_decorations: false,
            },
            refresh_rate: 60.,
            presentation_deadline_nanos: 1_666_666,
            freeform_width: 1080,
            freeform_height: 1920,
            scale: 1.,
        }
    }

    /// Sizes the backing display so that it fills the default display in the window's aspect.
    pub fn measure_scale(&mut self, display_width: u32, display_height: u32) {
        let short_scale =
            display_width.min(display_height) as f32 / self.width.min(self.height).max(1) as f32;
        let long_scale =
            display_width.max(display_height) as f32 / self.width.max(self.height).max(1) as f32;

        self.scale = short_scale.min(long_scale);
        self.freeform_width = (self.width as f32 * self.scale).round() as u32;
        self.freeform_height = (self.height as f32 * self.scale).round() as u32;
    }

    /// Fills in the derived fields from the default display.
    pub fn populate(&mut self, display: &DefaultDisplay) {
        self.measure_scale(display.width, display.height);
        self.refresh_rate = display.refresh_rate;
        self.presentation_deadline_nanos = display.presentation_deadline_nanos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_fits_short_side() {
        let mut config = FreeformConfig::new(540, 960, 320);
        config.measure_scale(1080, 2340);

        assert_eq!(config.scale, 2.);
        assert_eq!((config.freeform_width, config.freeform_height), (1080, 1920));
    }

    #[test]
    fn scale_fits_long_side() {
        let mut config = FreeformConfig::new(500, 1200, 320);
        config.measure_scale(1080, 2400);

        // Short side would allow 2.16, long side only 2.
        assert_eq!(config.scale, 2.);
        assert_eq!((config.freeform_width, config.freeform_height), (1000, 2400));
    }

    #[test]
    fn scale_ignores_orientation() {
        let mut portrait = FreeformConfig::new(600, 800, 320);
        portrait.measure_scale(1080, 2340);
        let mut landscape = FreeformConfig::new(600, 800, 320);
        landscape.measure_scale(2340, 1080);

        assert_eq!(portrait.scale, landscape.scale);
    }

    #[test]
    fn populate_takes_display_timing() {
        let mut config = FreeformConfig::new(540, 960, 320);
        config.populate(&DefaultDisplay {
            width: 1080,
            height: 2340,
            refresh_rate: 120.,
            presentation_deadline_nanos: 8_333_333,
        });

        assert_eq!(config.refresh_rate, 120.);
        assert_eq!(config.presentation_deadline_nanos, 8_333_333);
        assert_eq!(config.freeform_width, 1080);
    }
}
