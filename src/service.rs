//! Control plane of the freeform service.
//!
//! Everything except [`FreeformService::create_freeform`] is reserved to the privileged uid.
//! Calls from anyone else fail with [`Error::PermissionDenied`] before touching any state.

use std::sync::Arc;

use freeform_ipc::{CreateFreeform, FreeformKey, InputEvent, StartApp};

use crate::backend::RenderTarget;
use crate::client::ClientId;
use crate::display::{DisplayCallback, FreeformDisplayAdapter, FreeformFlags, FreeformParams};
use crate::services::ServiceGate;
use crate::window::{AppConfig, FreeformConfig, FreeformWindowManager};
use crate::{Error, Result};

/// Identity of whoever makes a control plane call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
}

#[derive(Clone)]
pub struct FreeformService {
    adapter: FreeformDisplayAdapter,
    windows: FreeformWindowManager,
    gate: ServiceGate,
    privileged_uid: u32,
    /// Presentation deadline of displays created on behalf of a user.
    default_deadline_nanos: i64,
}

impl FreeformService {
    pub fn new(
        adapter: FreeformDisplayAdapter,
        windows: FreeformWindowManager,
        gate: ServiceGate,
        privileged_uid: u32,
        default_deadline_nanos: i64,
    ) -> Self {
        Self {
            adapter,
            windows,
            gate,
            privileged_uid,
            default_deadline_nanos,
        }
    }

    pub fn adapter(&self) -> &FreeformDisplayAdapter {
        &self.adapter
    }

    pub fn windows(&self) -> &FreeformWindowManager {
        &self.windows
    }

    pub fn gate(&self) -> &ServiceGate {
        &self.gate
    }

    pub fn privileged_uid(&self) -> u32 {
        self.privileged_uid
    }

    fn authorize(&self, caller: Caller) -> Result<()> {
        if caller.uid != self.privileged_uid {
            debug!("rejecting call from uid {}", caller.uid);
            return Err(Error::PermissionDenied { uid: caller.uid });
        }
        Ok(())
    }

    /// Creates a display with an explicit deadline. For in-process callers, no uid check.
    pub fn create_freeform(
        &self,
        params: FreeformParams,
        callback: Arc<dyn DisplayCallback>,
        surface: Option<Box<dyn RenderTarget>>,
    ) -> Result<ClientId> {
        self.adapter.create_freeform(params, callback, surface)
    }

    /// Creates a display on behalf of a user, with the default presentation deadline.
    ///
    /// The surface named in the request is resolved by the caller and passed as `surface`.
    pub fn create_freeform_in_user(
        &self,
        caller: Caller,
        request: &CreateFreeform,
        callback: Arc<dyn DisplayCallback>,
        surface: Option<Box<dyn RenderTarget>>,
    ) -> Result<ClientId> {
        self.authorize(caller)?;

        debug!(
            "creating freeform display {} for user {}",
            request.name, request.user_id
        );
        let params = FreeformParams {
            name: request.name.clone(),
            width: request.width,
            height: request.height,
            density_dpi: request.density_dpi,
            refresh_rate: request.refresh_rate,
            presentation_deadline_nanos: self.default_deadline_nanos,
            flags: FreeformFlags {
                secure: request.secure,
                own_content_only: request.own_content_only,
                should_show_system_decorations: request.should_show_system_decorations,
            },
        };
        self.adapter.create_freeform(params, callback, surface)
    }

    pub fn resize_freeform(
        &self,
        caller: Caller,
        handle: ClientId,
        width: u32,
        height: u32,
        density_dpi: u32,
    ) -> Result<()> {
        self.authorize(caller)?;
        self.adapter
            .resize_freeform(handle, width, height, density_dpi)
    }

    pub fn release_freeform(&self, caller: Caller, handle: ClientId) -> Result<()> {
        self.authorize(caller)?;
        self.adapter.release_freeform(handle);
        Ok(())
    }

    pub fn set_freeform_surface(
        &self,
        caller: Caller,
        handle: ClientId,
        surface: Option<Box<dyn RenderTarget>>,
    ) -> Result<()> {
        self.authorize(caller)?;
        self.adapter.set_surface(handle, surface);
        Ok(())
    }

    pub fn start_app_in_freeform(&self, caller: Caller, request: StartApp) -> Result<FreeformKey> {
        self.authorize(caller)?;

        let key = FreeformKey::new(request.package_name, request.activity_name, request.user_id);
        if key.package_name.is_empty() || key.activity_name.is_empty() {
            return Err(Error::invalid(format!("invalid app {key}")));
        }

        let app = AppConfig {
            key,
            pending_launch: request.pending_launch,
            task_id: request.task_id,
            resource_package: request.resource_package,
            layout_name: request.layout_name,
        };
        let mut config = FreeformConfig::new(request.width, request.height, request.density_dpi);
        config.flags = FreeformFlags {
            secure: request.secure,
            own_content_only: request.own_content_only,
            should_show_system_decorations: request.should_show_system_decorations,
        };

        self.windows.add_window(app, config)
    }

    /// Removes the app's window without closing the app.
    pub fn remove_freeform(&self, caller: Caller, key: &FreeformKey) -> Result<()> {
        self.authorize(caller)?;
        self.windows.remove_window(key, false);
        Ok(())
    }

    pub fn inject_input(&self, caller: Caller, display_id: u32, event: InputEvent) -> Result<()> {
        self.authorize(caller)?;
        let services = self.gate.services()?;
        services.input.inject(display_id, event)?;
        Ok(())
    }

    /// Whether the host services are available.
    pub fn ping(&self, caller: Caller) -> Result<bool> {
        self.authorize(caller)?;
        Ok(self.gate.is_ready())
    }

    pub fn displays(&self, caller: Caller) -> Result<Vec<freeform_ipc::Display>> {
        self.authorize(caller)?;
        Ok(self.adapter.displays())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use freeform_config::WindowPolicy;

    use super::*;
    use crate::backend::Headless;
    use crate::display::callback::tests::Recorder;
    use crate::display::AdapterOptions;

    const SYSTEM: Caller = Caller { uid: 1000 };
    const STRANGER: Caller = Caller { uid: 10123 };

    fn service(headless: &Headless) -> FreeformService {
        let adapter = FreeformDisplayAdapter::new(
            Arc::new(headless.clone()),
            AdapterOptions {
                added_delay: Duration::from_secs(60),
                unique_id_prefix: String::from("freeform:"),
            },
        );
        let gate = ServiceGate::new();
        gate.try_acquire(headless, |_| ());
        let windows = FreeformWindowManager::new(adapter.clone(), gate.clone(), WindowPolicy::SingleSlot);
        FreeformService::new(adapter, windows, gate, SYSTEM.uid, 1_666_666)
    }

    fn create_request(name: &str) -> CreateFreeform {
        CreateFreeform {
            name: name.to_owned(),
            width: 1280,
            height: 720,
            density_dpi: 320,
            secure: false,
            own_content_only: true,
            should_show_system_decorations: false,
            surface: None,
            refresh_rate: 60.,
            user_id: 0,
        }
    }

    fn start_request(package: &str) -> StartApp {
        StartApp {
            package_name: package.to_owned(),
            activity_name: String::from(".Main"),
            user_id: 0,
            pending_launch: None,
            task_id: None,
            width: 540,
            height: 960,
            density_dpi: 320,
            secure: true,
            own_content_only: true,
            should_show_system_decorations: false,
            resource_package: None,
            layout_name: None,
        }
    }

    #[test]
    fn in_user_displays_use_default_deadline() {
        let headless = Headless::new();
        let service = service(&headless);
        let (recorder, _receiver) = Recorder::new();

        let handle = service
            .create_freeform_in_user(SYSTEM, &create_request("a"), recorder, None)
            .unwrap();

        let info = service.adapter().device_info(handle).unwrap();
        assert_eq!(info.presentation_deadline_nanos, 1_666_666 + 16_666_666);
        assert!(!info.flags.contains(crate::display::DeviceInfoFlags::SECURE));
    }

    #[test]
    fn strangers_change_nothing() {
        let headless = Headless::new();
        let service = service(&headless);

        let (recorder, _receiver) = Recorder::new();
        let handle = service
            .create_freeform_in_user(SYSTEM, &create_request("a"), recorder, None)
            .unwrap();
        let before = service.adapter().device_info(handle).unwrap();
        let events = headless.events().len();

        let denied = |res: Result<()>| {
            assert!(
                matches!(res, Err(Error::PermissionDenied { uid: 10123 })),
                "{res:?}"
            )
        };

        let (recorder, _receiver) = Recorder::new();
        denied(
            service
                .create_freeform_in_user(STRANGER, &create_request("b"), recorder, None)
                .map(|_| ()),
        );
        denied(service.resize_freeform(STRANGER, handle, 10, 10, 10));
        denied(service.set_freeform_surface(STRANGER, handle, None));
        denied(service.release_freeform(STRANGER, handle));
        denied(service.start_app_in_freeform(STRANGER, start_request("a")).map(|_| ()));
        denied(service.remove_freeform(STRANGER, &FreeformKey::new("a", ".Main", 0)));
        denied(service.inject_input(
            STRANGER,
            0,
            InputEvent::Key {
                keycode: 1,
                pressed: true,
            },
        ));
        denied(service.ping(STRANGER).map(|_| ()));
        denied(service.displays(STRANGER).map(|_| ()));

        assert_eq!(service.adapter().handles(), [handle]);
        assert_eq!(service.adapter().device_info(handle).unwrap(), before);
        assert_eq!(headless.events().len(), events);
        assert!(service.windows().windows().is_empty());
        assert!(headless.injected_input().is_empty());
    }

    #[test]
    fn unrestricted_create_skips_uid_check() {
        let headless = Headless::new();
        let service = service(&headless);
        let (recorder, _receiver) = Recorder::new();

        let params = FreeformParams {
            name: String::from("in-process"),
            width: 100,
            height: 100,
            density_dpi: 160,
            refresh_rate: 30.,
            presentation_deadline_nanos: 0,
            flags: FreeformFlags::default(),
        };
        let handle = service.create_freeform(params, recorder, None).unwrap();
        assert_eq!(
            service
                .adapter()
                .device_info(handle)
                .unwrap()
                .presentation_deadline_nanos,
            1_000_000_000 / 30
        );
    }

    #[test]
    fn start_and_remove_app() {
        let headless = Headless::new();
        let service = service(&headless);

        let key = service
            .start_app_in_freeform(SYSTEM, start_request("org.example"))
            .unwrap();
        assert_eq!(key.to_string(), "org.example,.Main,0");
        assert_eq!(service.windows().windows(), [key.clone()]);

        service.remove_freeform(SYSTEM, &key).unwrap();
        assert!(service.windows().windows().is_empty());
        assert!(service.adapter().is_empty());

        // Removing again is fine.
        service.remove_freeform(SYSTEM, &key).unwrap();
    }

    #[test]
    fn empty_package_is_rejected() {
        let headless = Headless::new();
        let service = service(&headless);
        let res = service.start_app_in_freeform(SYSTEM, start_request(""));
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn ping_and_input_follow_readiness() {
        let headless = Headless::without_services();
        let service = service(&headless);
        let event = InputEvent::Key {
            keycode: 1,
            pressed: true,
        };

        assert!(!service.ping(SYSTEM).unwrap());
        assert!(matches!(
            service.inject_input(SYSTEM, 0, event),
            Err(Error::NotReady)
        ));

        headless.set_services_available(true);
        service.gate().try_acquire(&headless, |_| ());

        assert!(service.ping(SYSTEM).unwrap());
        service.inject_input(SYSTEM, 0, event).unwrap();
        assert_eq!(headless.injected_input(), [(0, event)]);
    }
}
