//! Registry of virtual freeform displays.
//!
//! Every client owns at most one freeform display. All device state lives behind one lock, which
//! host traversals take as well. Lifecycle notifications to the owner go out through the device's
//! [`CallbackDispatcher`], so they are never delivered with the lock held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use freeform_config::DisplayConfig;

use crate::backend::{DisplayHost, DisplayToken, RenderTarget, Transaction};
use crate::client::{ClientHandle, ClientId, DeathLink};
use crate::{Error, Result};

pub mod callback;
pub mod device;
pub mod types;

pub use callback::{CallbackDispatcher, DisplayCallback};
pub use device::{DisplayDevice, FreeformDisplayDevice, FreeformParams};
pub use types::{
    DeviceEvent, DeviceEventKind, DeviceInfoFlags, DisplayDeviceInfo, FreeformFlags,
    PendingChanges,
};

/// Tunables of the display registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOptions {
    /// Delay between adding a display and telling its owner the logical id.
    pub added_delay: Duration,
    pub unique_id_prefix: String,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self::from(&DisplayConfig::default())
    }
}

impl From<&DisplayConfig> for AdapterOptions {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            added_delay: config.added_delay(),
            unique_id_prefix: config.unique_id_prefix.clone(),
        }
    }
}

/// Handle to the freeform display registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct FreeformDisplayAdapter {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<AdapterState>,
    host: Arc<dyn DisplayHost>,
    options: AdapterOptions,
}

#[derive(Default)]
struct AdapterState {
    devices: HashMap<ClientId, DeviceEntry>,
}

struct DeviceEntry {
    device: FreeformDisplayDevice,
    client: ClientHandle,
    dispatcher: CallbackDispatcher,
    /// Cancelled when the entry is dropped.
    death_link: Option<DeathLink>,
}

impl FreeformDisplayAdapter {
    pub fn new(host: Arc<dyn DisplayHost>, options: AdapterOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AdapterState::default()),
                host,
                options,
            }),
        }
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.shared.options
    }

    /// Creates a freeform display owned by the callback's client.
    ///
    /// Returns the handle identifying the display in later calls. The owner is told the logical
    /// display id after the configured delay, if the display is still around by then.
    pub fn create_freeform(
        &self,
        params: FreeformParams,
        callback: Arc<dyn DisplayCallback>,
        surface: Option<Box<dyn RenderTarget>>,
    ) -> Result<ClientId> {
        let _span = tracy_client::span!("FreeformDisplayAdapter::create_freeform");

        validate(&params)?;

        let shared = &self.shared;
        let host = &*shared.host;
        let client = callback.client().clone();
        let id = client.id();

        let mut state = shared.lock();
        if state.devices.contains_key(&id) {
            return Err(Error::invalid(format!(
                "client {id} already owns a freeform display"
            )));
        }

        let unique_id = format!("{}{}", shared.options.unique_id_prefix, params.name);
        let token = host.create_display(&unique_id, params.flags.secure, params.refresh_rate)?;
        let mut device = FreeformDisplayDevice::new(token, unique_id.clone(), params, surface);

        let dispatcher = match CallbackDispatcher::spawn(&unique_id, callback) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                device.teardown(host);
                return Err(err.into());
            }
        };

        host.device_event(DeviceEvent {
            kind: DeviceEventKind::Added,
            token,
            unique_id: unique_id.clone(),
            info: Some(device.info().clone()),
        });

        let weak = Arc::downgrade(shared);
        let link = client.link_to_death(move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_client_died(id);
            }
        });

        let mut entry = DeviceEntry {
            device,
            client,
            dispatcher,
            death_link: None,
        };
        match link {
            Ok(link) => entry.death_link = Some(link),
            Err(gone) => {
                warn!("client {id} went away while creating {unique_id}");
                shared.teardown(entry, false);
                return Err(gone.into());
            }
        }

        let resolve = Shared::resolve_later(Arc::downgrade(shared), id, token);
        entry
            .dispatcher
            .added_after(shared.options.added_delay, resolve);
        state.devices.insert(id, entry);

        info!("created freeform display {unique_id} for client {id}");
        Ok(id)
    }

    /// Changes the geometry of a display. Unknown handles are ignored.
    pub fn resize_freeform(
        &self,
        id: ClientId,
        width: u32,
        height: u32,
        density_dpi: u32,
    ) -> Result<()> {
        let _span = tracy_client::span!("FreeformDisplayAdapter::resize_freeform");

        if width == 0 || height == 0 || density_dpi == 0 {
            return Err(Error::invalid(format!(
                "invalid geometry {width}x{height} at {density_dpi} dpi"
            )));
        }

        let shared = &self.shared;
        let mut state = shared.lock();
        let Some(entry) = state.devices.get_mut(&id) else {
            debug!("ignoring resize of unknown display {id}");
            return Ok(());
        };

        if !entry.device.resize(width, height, density_dpi) {
            return Ok(());
        }

        debug!(
            "resized {} to {width}x{height} at {density_dpi} dpi",
            entry.device.unique_id()
        );
        shared.emit_changed(&mut entry.device);
        shared.host.request_traversal();
        Ok(())
    }

    /// Replaces the render target of a display, pausing or resuming it accordingly.
    ///
    /// Unknown handles are ignored.
    pub fn set_surface(&self, id: ClientId, surface: Option<Box<dyn RenderTarget>>) {
        let _span = tracy_client::span!("FreeformDisplayAdapter::set_surface");

        let shared = &self.shared;
        let mut state = shared.lock();
        let Some(entry) = state.devices.get_mut(&id) else {
            debug!("ignoring surface change of unknown display {id}");
            return;
        };

        let was_paused = entry.device.is_paused();
        if was_paused && surface.is_none() {
            debug!("display {id} has no surface to detach");
            return;
        }

        entry.device.set_surface(surface);
        let paused = entry.device.is_paused();

        shared.emit_changed(&mut entry.device);
        shared.host.request_traversal();

        match (was_paused, paused) {
            (false, true) => entry.dispatcher.paused(),
            (true, false) => entry.dispatcher.resumed(),
            _ => (),
        }
    }

    /// Tears a display down and tells its owner. Unknown handles are ignored.
    pub fn release_freeform(&self, id: ClientId) {
        let _span = tracy_client::span!("FreeformDisplayAdapter::release_freeform");

        let shared = &self.shared;
        let mut state = shared.lock();
        let Some(entry) = state.devices.remove(&id) else {
            debug!("ignoring release of unknown display {id}");
            return;
        };

        shared.teardown(entry, true);
    }

    /// Pushes pending changes of every display into the transaction.
    pub fn perform_traversal(&self, tx: &mut dyn Transaction) {
        let _span = tracy_client::span!("FreeformDisplayAdapter::perform_traversal");

        let mut state = self.shared.lock();
        for entry in state.devices.values_mut() {
            entry.device.apply_pending_changes(tx);
        }
    }

    pub fn device_info(&self, id: ClientId) -> Option<DisplayDeviceInfo> {
        let mut state = self.shared.lock();
        let entry = state.devices.get_mut(&id)?;
        Some(entry.device.info().clone())
    }

    pub fn pending_changes(&self, id: ClientId) -> Option<PendingChanges> {
        let state = self.shared.lock();
        Some(state.devices.get(&id)?.device.pending_changes())
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.shared.lock().devices.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of all live displays, sorted.
    pub fn handles(&self) -> Vec<ClientId> {
        let state = self.shared.lock();
        let mut handles: Vec<_> = state.devices.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Describes all live displays, sorted by handle.
    pub fn displays(&self) -> Vec<freeform_ipc::Display> {
        let shared = &self.shared;
        let state = shared.lock();

        let mut displays: Vec<_> = state
            .devices
            .iter()
            .map(|(id, entry)| {
                let device = &entry.device;
                freeform_ipc::Display {
                    handle: id.get(),
                    unique_id: device.unique_id().to_owned(),
                    width: device.width(),
                    height: device.height(),
                    density_dpi: device.density_dpi(),
                    refresh_rate: device.refresh_rate(),
                    logical_id: shared.host.logical_display_id(device.token()),
                    paused: device.is_paused(),
                }
            })
            .collect();
        displays.sort_unstable_by_key(|d| d.handle);
        displays
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_client_died(&self, id: ClientId) {
        let _span = tracy_client::span!("FreeformDisplayAdapter::handle_client_died");

        let mut state = self.lock();
        let Some(entry) = state.devices.remove(&id) else {
            return;
        };

        debug!("client {id} died, tearing down {}", entry.device.unique_id());
        self.teardown(entry, false);
    }

    /// Destroys a display that is no longer in the map.
    fn teardown(&self, mut entry: DeviceEntry, notify: bool) {
        let host = &*self.host;
        entry.device.teardown(host);

        if notify && entry.client.is_alive() {
            entry.dispatcher.stopped();
        }

        let unique_id = entry.device.unique_id().to_owned();
        let token = entry.device.token();
        drop(entry);

        host.device_event(DeviceEvent {
            kind: DeviceEventKind::Removed,
            token,
            unique_id: unique_id.clone(),
            info: None,
        });
        info!("removed freeform display {unique_id}");
    }

    fn emit_changed(&self, device: &mut FreeformDisplayDevice) {
        self.host.device_event(DeviceEvent {
            kind: DeviceEventKind::Changed,
            token: device.token(),
            unique_id: device.unique_id().to_owned(),
            info: Some(device.info().clone()),
        });
    }

    /// Looks up the logical id once the delayed added notification fires.
    ///
    /// Resolves to nothing if the display is gone or was replaced in the meantime.
    fn resolve_later(
        weak: Weak<Shared>,
        id: ClientId,
        token: DisplayToken,
    ) -> callback::ResolveDisplayId {
        Box::new(move || {
            let shared = weak.upgrade()?;
            let state = shared.lock();
            let entry = state.devices.get(&id)?;
            if entry.device.token() != token {
                return None;
            }
            shared.host.logical_display_id(token)
        })
    }
}

fn validate(params: &FreeformParams) -> Result<()> {
    if params.name.is_empty() {
        return Err(Error::invalid("display name must not be empty"));
    }
    if params.width == 0 || params.height == 0 || params.density_dpi == 0 {
        return Err(Error::invalid(format!(
            "invalid geometry {}x{} at {} dpi",
            params.width, params.height, params.density_dpi
        )));
    }
    if !params.refresh_rate.is_finite() || params.refresh_rate < 1. {
        return Err(Error::invalid(format!(
            "invalid refresh rate {}",
            params.refresh_rate
        )));
    }
    if params.presentation_deadline_nanos < 0 {
        return Err(Error::invalid(format!(
            "invalid presentation deadline {}ns",
            params.presentation_deadline_nanos
        )));
    }
    Ok(())
}
