//! Delivery of display lifecycle notifications to display owners.
//!
//! Every display gets a dispatcher thread running its own event loop. Notifications are queued
//! through a channel and delivered in order, never with the registry lock held.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use calloop::channel::{self, Channel, Event, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle};

use crate::client::ClientHandle;
use crate::utils::spawn_named;

/// Receiver of display lifecycle notifications, usually living in another process.
pub trait DisplayCallback: Send + Sync {
    /// The client owning the display.
    fn client(&self) -> &ClientHandle;
    /// The host picked the display up and gave it a logical id.
    fn on_display_added(&self, display_id: u32) -> anyhow::Result<()>;
    fn on_display_paused(&self) -> anyhow::Result<()>;
    fn on_display_resumed(&self) -> anyhow::Result<()>;
    /// The display was released. Not sent when the owner itself went away.
    fn on_display_stopped(&self) -> anyhow::Result<()>;
}

/// Looks up the logical id of a display when a delayed added notification fires.
///
/// Returning `None` drops the notification.
pub type ResolveDisplayId = Box<dyn FnOnce() -> Option<u32> + Send>;

enum DispatchMsg {
    Paused,
    Resumed,
    Stopped,
    AddedAfter {
        delay: Duration,
        resolve: ResolveDisplayId,
    },
}

/// Serialized delivery context of one display.
///
/// Dropping the dispatcher lets it deliver what is already queued, then stops its thread.
/// Scheduled added notifications that have not fired yet are dropped.
pub struct CallbackDispatcher {
    name: String,
    sender: Sender<DispatchMsg>,
}

struct DispatcherState {
    name: String,
    callback: Arc<dyn DisplayCallback>,
}

impl CallbackDispatcher {
    pub fn spawn(name: &str, callback: Arc<dyn DisplayCallback>) -> anyhow::Result<Self> {
        let (sender, channel) = channel::channel();

        let state = DispatcherState {
            name: name.to_owned(),
            callback,
        };
        spawn_named(format!("freeform callbacks {name}"), move || {
            let name = state.name.clone();
            if let Err(err) = run(channel, state) {
                warn!("error running callback dispatcher for {name}: {err:?}");
            }
        })?;

        Ok(Self {
            name: name.to_owned(),
            sender,
        })
    }

    pub fn paused(&self) {
        self.send(DispatchMsg::Paused);
    }

    pub fn resumed(&self) {
        self.send(DispatchMsg::Resumed);
    }

    pub fn stopped(&self) {
        self.send(DispatchMsg::Stopped);
    }

    /// Schedules an added notification after `delay`, with the id `resolve` returns then.
    pub fn added_after(&self, delay: Duration, resolve: ResolveDisplayId) {
        self.send(DispatchMsg::AddedAfter { delay, resolve });
    }

    fn send(&self, msg: DispatchMsg) {
        if self.sender.send(msg).is_err() {
            warn!("callback dispatcher for {} is gone", self.name);
        }
    }
}

fn run(channel: Channel<DispatchMsg>, mut state: DispatcherState) -> anyhow::Result<()> {
    let mut event_loop: EventLoop<'static, DispatcherState> =
        EventLoop::try_new().context("error creating event loop")?;
    let handle = event_loop.handle();
    let signal = event_loop.get_signal();

    let timers = handle.clone();
    let token = handle
        .insert_source(channel, move |event, _, state| match event {
            Event::Msg(msg) => state.dispatch(msg, &timers),
            Event::Closed => signal.stop(),
        })
        .map_err(|err| err.error)
        .context("error inserting callback channel")?;

    event_loop
        .run(None, &mut state, |_| ())
        .context("error running event loop")?;

    // The channel source holds a handle to its own loop.
    handle.remove(token);

    debug!("callback dispatcher for {} finished", state.name);
    Ok(())
}

impl DispatcherState {
    fn dispatch(&mut self, msg: DispatchMsg, handle: &LoopHandle<'static, DispatcherState>) {
        let _span = tracy_client::span!("DispatcherState::dispatch");

        match msg {
            DispatchMsg::Paused => self.deliver("paused", |cb| cb.on_display_paused()),
            DispatchMsg::Resumed => self.deliver("resumed", |cb| cb.on_display_resumed()),
            DispatchMsg::Stopped => self.deliver("stopped", |cb| cb.on_display_stopped()),
            DispatchMsg::AddedAfter { delay, resolve } => {
                let mut resolve = Some(resolve);
                let res = handle.insert_source(Timer::from_duration(delay), move |_, _, state| {
                    if let Some(display_id) = resolve.take().and_then(|resolve| resolve()) {
                        state.deliver("added", |cb| cb.on_display_added(display_id));
                    } else {
                        debug!("dropping added notification for {}", state.name);
                    }
                    TimeoutAction::Drop
                });

                if let Err(err) = res {
                    warn!(
                        "error scheduling added notification for {}: {}",
                        self.name, err.error
                    );
                }
            }
        }
    }

    fn deliver(
        &self,
        what: &str,
        f: impl FnOnce(&dyn DisplayCallback) -> anyhow::Result<()>,
    ) {
        if let Err(err) = f(&*self.callback) {
            warn!("error delivering {what} to {}: {err:?}", self.name);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    /// A delivered notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Note {
        Added(u32),
        Paused,
        Resumed,
        Stopped,
    }

    /// Callback forwarding every notification into a channel.
    pub struct Recorder {
        client: ClientHandle,
        sender: Mutex<mpsc::Sender<Note>>,
        fail: bool,
    }

    impl Recorder {
        pub fn new() -> (Arc<Self>, mpsc::Receiver<Note>) {
            Self::with_client(ClientHandle::new())
        }

        pub fn with_client(client: ClientHandle) -> (Arc<Self>, mpsc::Receiver<Note>) {
            let (sender, receiver) = mpsc::channel();
            let recorder = Self {
                client,
                sender: Mutex::new(sender),
                fail: false,
            };
            (Arc::new(recorder), receiver)
        }

        fn record(&self, note: Note) -> anyhow::Result<()> {
            let _ = self.sender.lock().unwrap().send(note);
            if self.fail {
                bail!("listener failed on {note:?}");
            }
            Ok(())
        }
    }

    impl DisplayCallback for Recorder {
        fn client(&self) -> &ClientHandle {
            &self.client
        }

        fn on_display_added(&self, display_id: u32) -> anyhow::Result<()> {
            self.record(Note::Added(display_id))
        }

        fn on_display_paused(&self) -> anyhow::Result<()> {
            self.record(Note::Paused)
        }

        fn on_display_resumed(&self) -> anyhow::Result<()> {
            self.record(Note::Resumed)
        }

        fn on_display_stopped(&self) -> anyhow::Result<()> {
            self.record(Note::Stopped)
        }
    }

    /// Collects notes until the channel stays quiet for a while.
    pub fn drain(receiver: &mpsc::Receiver<Note>) -> Vec<Note> {
        let mut notes = Vec::new();
        while let Ok(note) = receiver.recv_timeout(Duration::from_millis(200)) {
            notes.push(note);
        }
        notes
    }

    #[test]
    fn delivers_in_order() {
        let (recorder, receiver) = Recorder::new();
        let dispatcher = CallbackDispatcher::spawn("test", recorder).unwrap();

        dispatcher.paused();
        dispatcher.resumed();
        dispatcher.stopped();

        assert_eq!(drain(&receiver), [Note::Paused, Note::Resumed, Note::Stopped]);
    }

    #[test]
    fn delayed_added_is_resolved_at_fire_time() {
        let (recorder, receiver) = Recorder::new();
        let dispatcher = CallbackDispatcher::spawn("test", recorder).unwrap();

        dispatcher.added_after(Duration::from_millis(10), Box::new(|| Some(7)));
        dispatcher.added_after(Duration::from_millis(10), Box::new(|| None));

        assert_eq!(drain(&receiver), [Note::Added(7)]);
    }

    #[test]
    fn queued_messages_survive_drop() {
        let (recorder, receiver) = Recorder::new();
        let dispatcher = CallbackDispatcher::spawn("test", recorder).unwrap();

        dispatcher.added_after(Duration::from_secs(60), Box::new(|| Some(1)));
        dispatcher.stopped();
        drop(dispatcher);

        assert_eq!(drain(&receiver), [Note::Stopped]);
    }

    #[test]
    fn failing_listener_keeps_dispatcher_alive() {
        let (sender, receiver) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            client: ClientHandle::new(),
            sender: Mutex::new(sender),
            fail: true,
        });
        let dispatcher = CallbackDispatcher::spawn("test", recorder).unwrap();

        dispatcher.paused();
        dispatcher.resumed();

        assert_eq!(drain(&receiver), [Note::Paused, Note::Resumed]);
    }
}
