//! Closing windows whose app went away.
//!
//! The host reports task changes on threads of its own, possibly while a window call holds the
//! table lock. Events are handed to a watcher thread which does the table work.

use std::sync::{Mutex, Weak};

use anyhow::Context;
use calloop::channel::{self, Channel, Event, Sender};
use calloop::EventLoop;

use super::WindowTable;
use crate::backend::TaskEvent;
use crate::utils::spawn_named;

/// Spawns the watcher, returning where to send task events.
///
/// The watcher stops once every sender is gone or the table is dropped.
pub(super) fn spawn_task_watcher(
    table: Weak<Mutex<WindowTable>>,
) -> anyhow::Result<Sender<TaskEvent>> {
    let (sender, channel) = channel::channel();
    spawn_named("freeform task watcher", move || {
        if let Err(err) = run(channel, table) {
            warn!("error running task watcher: {err:?}");
        }
    })?;
    Ok(sender)
}

fn run(channel: Channel<TaskEvent>, table: Weak<Mutex<WindowTable>>) -> anyhow::Result<()> {
    let mut event_loop: EventLoop<'static, ()> =
        EventLoop::try_new().context("error creating event loop")?;
    let handle = event_loop.handle();
    let signal = event_loop.get_signal();

    let token = handle
        .insert_source(channel, move |event, _, _| match event {
            Event::Msg(event) => {
                if !on_task_event(&table, event) {
                    signal.stop();
                }
            }
            Event::Closed => signal.stop(),
        })
        .map_err(|err| err.error)
        .context("error inserting task channel")?;

    event_loop
        .run(None, &mut (), |_| ())
        .context("error running event loop")?;

    handle.remove(token);
    debug!("task watcher finished");
    Ok(())
}

/// Destroys the window that lost its task, if any. Returns false once the table is gone.
fn on_task_event(table: &Weak<Mutex<WindowTable>>, event: TaskEvent) -> bool {
    let _span = tracy_client::span!("on_task_event");

    let Some(table) = table.upgrade() else {
        return false;
    };

    let window = {
        let mut table = table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = table
            .iter()
            .find(|(_, window)| window.loses_task(event))
            .map(|(key, _)| key.clone());
        key.and_then(|key| table.remove(&key))
    };

    if let Some(window) = window {
        info!("freeform window {} lost its task: {event:?}", window.key());
        window.destroy();
    }
    true
}
