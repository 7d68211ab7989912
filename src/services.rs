//! Readiness gate for the host services freeform windows depend on.
//!
//! The host brings its services up in no particular order. The gate polls for them on a background
//! thread and flips to ready once all are present. Until then, anything needing them fails with
//! [`Error::NotReady`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use freeform_config::ReadinessConfig;

use crate::backend::{InputService, ServiceManager, TaskService, WindowService};
use crate::utils::spawn_named;
use crate::{Error, Result};

/// The host services, once all of them were found.
#[derive(Clone)]
pub struct SystemServices {
    pub input: Arc<dyn InputService>,
    pub tasks: Arc<dyn TaskService>,
    pub windows: Arc<dyn WindowService>,
}

impl SystemServices {
    fn lookup(manager: &dyn ServiceManager) -> Option<Self> {
        Some(Self {
            input: manager.input()?,
            tasks: manager.tasks()?,
            windows: manager.windows()?,
        })
    }
}

/// Process-wide ready flag. Clones refer to the same gate.
#[derive(Clone, Default)]
pub struct ServiceGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    services: OnceLock<SystemServices>,
    gave_up: AtomicBool,
}

impl ServiceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.services.get().is_some()
    }

    /// Whether polling ran out of attempts. A gate that gave up stays not ready.
    pub fn gave_up(&self) -> bool {
        self.inner.gave_up.load(Ordering::Acquire)
    }

    pub fn services(&self) -> Result<&SystemServices> {
        self.inner.services.get().ok_or(Error::NotReady)
    }

    /// Looks the services up once. Returns whether the gate is ready afterwards.
    ///
    /// `on_ready` runs if this call made the gate ready. Does nothing once the gate gave up.
    pub fn try_acquire(
        &self,
        manager: &dyn ServiceManager,
        on_ready: impl FnOnce(&SystemServices),
    ) -> bool {
        if self.is_ready() {
            return true;
        }
        if self.gave_up() {
            return false;
        }

        let Some(services) = SystemServices::lookup(manager) else {
            return false;
        };

        if self.inner.services.set(services).is_ok() {
            if let Some(services) = self.inner.services.get() {
                on_ready(services);
            }
        }
        true
    }

    /// Polls for the services until they show up or the attempt budget is spent.
    pub fn poll(
        &self,
        manager: &dyn ServiceManager,
        config: &ReadinessConfig,
        on_ready: impl FnOnce(&SystemServices),
    ) -> bool {
        let _span = tracy_client::span!("ServiceGate::poll");

        let attempts = config.max_attempts.max(1);
        let mut on_ready = Some(on_ready);
        for attempt in 1..=attempts {
            let ready = self.try_acquire(manager, |services| {
                if let Some(on_ready) = on_ready.take() {
                    on_ready(services);
                }
            });
            if ready {
                info!("host services ready after {attempt} attempt(s)");
                return true;
            }

            if attempt < attempts {
                debug!("host services not available yet, attempt {attempt}/{attempts}");
                thread::sleep(config.retry_interval());
            }
        }

        warn!("host services still unavailable after {attempts} attempts, giving up");
        self.inner.gave_up.store(true, Ordering::Release);
        false
    }

    /// Polls on a background thread.
    pub fn spawn_poll(
        &self,
        manager: Arc<dyn ServiceManager>,
        config: ReadinessConfig,
        on_ready: impl FnOnce(&SystemServices) + Send + 'static,
    ) -> anyhow::Result<()> {
        let gate = self.clone();
        spawn_named("freeform service poll", move || {
            gate.poll(&*manager, &config, on_ready);
        })?;
        Ok(())
    }
}
