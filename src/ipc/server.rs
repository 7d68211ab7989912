//! Control socket served from the main event loop.
//!
//! The listener and every client stream are calloop sources. Requests are newline-delimited
//! JSON; each client gets a read buffer for partial lines and a write buffer for what the socket
//! would not take yet. Display notifications come from dispatcher threads through a channel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::{env, fs, process};

use anyhow::{bail, Context};
use calloop::channel::{self, Sender};
use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use freeform_ipc::{Event, Reply, Request, Response, ServerMessage};

use crate::backend::{RenderTarget, SurfaceProvider};
use crate::client::{ClientHandle, ClientId};
use crate::display::DisplayCallback;
use crate::service::{Caller, FreeformService};
use crate::utils::{runtime_dir, version};

type ConnectionId = u64;

pub struct IpcServer {
    pub socket_path: PathBuf,
    /// Loop sources only hold weak references to this.
    _state: Rc<RefCell<IpcState>>,
}

struct IpcState {
    this: Weak<RefCell<IpcState>>,
    handle: LoopHandle<'static, ()>,
    service: FreeformService,
    surfaces: Arc<dyn SurfaceProvider>,
    events: Sender<(ConnectionId, Event)>,
    clients: HashMap<ConnectionId, ClientConnection>,
    next_id: ConnectionId,
}

/// Per-connection state.
struct ClientConnection {
    caller: Caller,
    /// Clone of the stream the read source owns.
    writer: UnixStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    read_source: Option<RegistrationToken>,
    /// Registered while `write_buf` holds data the socket did not take.
    write_source: Option<RegistrationToken>,
    /// Displays created over this connection, by handle.
    displays: HashMap<u64, ClientHandle>,
}

/// Forwards display notifications to the connection that created the display.
struct ConnectionCallback {
    client: ClientHandle,
    connection: ConnectionId,
    events: Sender<(ConnectionId, Event)>,
}

pub fn default_socket_path() -> PathBuf {
    let socket_name = format!("freeform.{}.sock", process::id());
    runtime_dir().join(socket_name)
}

impl IpcServer {
    pub fn start(
        handle: &LoopHandle<'static, ()>,
        service: FreeformService,
        surfaces: Arc<dyn SurfaceProvider>,
        socket_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Ipc::start");

        let socket_path = socket_path.unwrap_or_else(default_socket_path);
        remove_stale_socket(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("error binding socket at {}", socket_path.display()))?;
        listener
            .set_nonblocking(true)
            .context("error setting socket to non-blocking")?;

        let (events, events_source) = channel::channel();
        let state = Rc::new_cyclic(|this| {
            RefCell::new(IpcState {
                this: this.clone(),
                handle: handle.clone(),
                service,
                surfaces,
                events,
                clients: HashMap::new(),
                next_id: 1,
            })
        });

        let weak = Rc::downgrade(&state);
        handle
            .insert_source(
                Generic::new(listener, Interest::READ, Mode::Level),
                move |_, listener, _| {
                    let Some(state) = weak.upgrade() else {
                        return Ok(PostAction::Remove);
                    };

                    loop {
                        match listener.accept() {
                            Ok((stream, _)) => {
                                if let Err(err) = state.borrow_mut().accept(stream) {
                                    warn!("error accepting IPC client: {err:?}");
                                }
                            }
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                            Err(err) => {
                                warn!("error accepting IPC connection: {err:?}");
                                break;
                            }
                        }
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| err.error)
            .context("error inserting IPC listener source")?;

        let weak = Rc::downgrade(&state);
        handle
            .insert_source(events_source, move |event, _, _| {
                let channel::Event::Msg((connection, event)) = event else {
                    return;
                };
                if let Some(state) = weak.upgrade() {
                    state.borrow_mut().send_event(connection, event);
                }
            })
            .map_err(|err| err.error)
            .context("error inserting IPC event channel")?;

        info!("listening on {}", socket_path.display());
        Ok(Self {
            socket_path,
            _state: state,
        })
    }

    /// Exports the socket path for child processes and `freeform msg`.
    pub fn export_env(&self) {
        env::set_var(freeform_ipc::SOCKET_PATH_ENV, &self.socket_path);
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// Removes a socket file nobody listens on anymore.
fn remove_stale_socket(path: &Path) {
    if path.exists() && UnixStream::connect(path).is_err() {
        debug!("removing stale socket at {}", path.display());
        let _ = fs::remove_file(path);
    }
}

#[cfg(target_os = "linux")]
fn peer_uid(stream: &UnixStream) -> io::Result<u32> {
    use std::os::fd::AsRawFd;

    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: cred and len are valid for writes and len holds the size of cred.
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(cred.uid)
}

#[cfg(not(target_os = "linux"))]
fn peer_uid(stream: &UnixStream) -> io::Result<u32> {
    use std::os::fd::AsRawFd;

    let mut uid = 0;
    let mut gid = 0;
    // SAFETY: uid and gid are valid for writes.
    let ret = unsafe { libc::getpeereid(stream.as_raw_fd(), &mut uid, &mut gid) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(uid)
}

// =============================================================================
// Connections
// =============================================================================

impl IpcState {
    fn accept(&mut self, stream: UnixStream) -> anyhow::Result<()> {
        let uid = peer_uid(&stream).context("error reading peer credentials")?;
        stream
            .set_nonblocking(true)
            .context("error setting stream to non-blocking")?;
        let writer = stream.try_clone().context("error cloning stream")?;

        let id = self.next_id;
        self.next_id += 1;

        let weak = self.this.clone();
        let token = self
            .handle
            .insert_source(
                Generic::new(stream, Interest::READ, Mode::Level),
                move |_, stream, _| {
                    let Some(state) = weak.upgrade() else {
                        return Ok(PostAction::Remove);
                    };

                    let action = state.borrow_mut().on_readable(id, stream);
                    Ok(action)
                },
            )
            .map_err(|err| err.error)
            .context("error inserting IPC client source")?;

        self.clients.insert(
            id,
            ClientConnection {
                caller: Caller { uid },
                writer,
                read_buf: Vec::new(),
                write_buf: Vec::new(),
                read_source: Some(token),
                write_source: None,
                displays: HashMap::new(),
            },
        );
        debug!("IPC client {id} connected, uid {uid}");
        Ok(())
    }

    fn on_readable(&mut self, id: ConnectionId, mut stream: &UnixStream) -> PostAction {
        let _span = tracy_client::span!("IpcState::on_readable");

        let Some(client) = self.clients.get_mut(&id) else {
            return PostAction::Remove;
        };

        let mut closed = false;
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => client.read_buf.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("error reading from IPC client {id}: {err}");
                    closed = true;
                    break;
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = client.read_buf.iter().position(|b| *b == b'\n') {
            lines.push(client.read_buf.drain(..=pos).collect::<Vec<_>>());
        }

        for line in lines {
            let Ok(line) = std::str::from_utf8(&line) else {
                let reply = Err(String::from("error parsing request: invalid UTF-8"));
                if let Err(err) = self.send(id, &ServerMessage::Reply(reply)) {
                    debug!("error writing to IPC client {id}: {err:?}");
                    closed = true;
                    break;
                }
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<Request>(line) {
                Ok(request) => self.process(id, request),
                Err(err) => Err(format!("error parsing request: {err}")),
            };

            if let Err(err) = self.send(id, &ServerMessage::Reply(reply)) {
                debug!("error writing to IPC client {id}: {err:?}");
                closed = true;
                break;
            }
        }

        if closed {
            // The source goes away through the returned action.
            if let Some(client) = self.clients.get_mut(&id) {
                client.read_source = None;
            }
            self.disconnect(id);
            return PostAction::Remove;
        }

        PostAction::Continue
    }

    fn on_writable(&mut self, id: ConnectionId) -> PostAction {
        match self.flush(id) {
            Ok(()) => {
                let Some(client) = self.clients.get_mut(&id) else {
                    return PostAction::Remove;
                };
                if client.write_buf.is_empty() {
                    client.write_source = None;
                    PostAction::Remove
                } else {
                    PostAction::Continue
                }
            }
            Err(err) => {
                debug!("error writing to IPC client {id}: {err:?}");
                if let Some(client) = self.clients.get_mut(&id) {
                    client.write_source = None;
                }
                self.disconnect(id);
                PostAction::Remove
            }
        }
    }

    fn send_event(&mut self, id: ConnectionId, event: Event) {
        if let Err(err) = self.send(id, &ServerMessage::Event(event)) {
            debug!("error writing to IPC client {id}: {err:?}");
            self.disconnect(id);
        }
    }

    /// Queues a message for the client and writes as much as the socket takes.
    ///
    /// Messages for clients that are gone are dropped.
    fn send(&mut self, id: ConnectionId, message: &ServerMessage) -> anyhow::Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };

        let mut buf = serde_json::to_vec(message).context("error formatting message")?;
        buf.push(b'\n');
        client.write_buf.extend_from_slice(&buf);
        self.flush(id)
    }

    fn flush(&mut self, id: ConnectionId) -> anyhow::Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };

        while !client.write_buf.is_empty() {
            match client.writer.write(&client.write_buf) {
                Ok(0) => bail!("connection closed"),
                Ok(n) => {
                    client.write_buf.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("error writing message"),
            }
        }

        if !client.write_buf.is_empty() && client.write_source.is_none() {
            let writer = client.writer.try_clone().context("error cloning stream")?;
            let weak = self.this.clone();
            let token = self
                .handle
                .insert_source(
                    Generic::new(writer, Interest::WRITE, Mode::Level),
                    move |_, _, _| {
                        let Some(state) = weak.upgrade() else {
                            return Ok(PostAction::Remove);
                        };
                        let action = state.borrow_mut().on_writable(id);
                        Ok(action)
                    },
                )
                .map_err(|err| err.error)
                .context("error inserting IPC write source")?;
            client.write_source = Some(token);
        }

        Ok(())
    }

    /// Drops the connection and every display it created.
    fn disconnect(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };

        for token in [client.read_source, client.write_source].into_iter().flatten() {
            self.handle.remove(token);
        }

        // The connection owned these displays.
        for display in client.displays.values() {
            display.disconnect();
        }
        debug!("IPC client {id} disconnected");
    }

    fn process(&mut self, id: ConnectionId, request: Request) -> Reply {
        let _span = tracy_client::span!("IpcState::process");

        let Some(client) = self.clients.get_mut(&id) else {
            return Err(String::from("connection is gone"));
        };
        let caller = client.caller;
        let service = &self.service;

        let response = match request {
            Request::Version => Response::Version(version()),
            Request::Ping => Response::Ping(service.ping(caller).map_err(fmt_error)?),
            Request::Displays => Response::Displays(service.displays(caller).map_err(fmt_error)?),
            Request::CreateFreeform(request) => {
                let surface = open_surface(&*self.surfaces, request.surface.as_deref())?;
                let handle = ClientHandle::new();
                let callback = Arc::new(ConnectionCallback {
                    client: handle.clone(),
                    connection: id,
                    events: self.events.clone(),
                });

                let display = service
                    .create_freeform_in_user(caller, &request, callback, surface)
                    .map_err(fmt_error)?;
                client.displays.insert(display.get(), handle);
                Response::Created {
                    handle: display.get(),
                }
            }
            Request::ResizeFreeform {
                handle,
                width,
                height,
                density_dpi,
            } => {
                service
                    .resize_freeform(caller, ClientId::specific(handle), width, height, density_dpi)
                    .map_err(fmt_error)?;
                Response::Handled
            }
            Request::SetFreeformSurface { handle, surface } => {
                let surface = open_surface(&*self.surfaces, surface.as_deref())?;
                service
                    .set_freeform_surface(caller, ClientId::specific(handle), surface)
                    .map_err(fmt_error)?;
                Response::Handled
            }
            Request::ReleaseFreeform { handle } => {
                service
                    .release_freeform(caller, ClientId::specific(handle))
                    .map_err(fmt_error)?;
                client.displays.remove(&handle);
                Response::Handled
            }
            Request::StartAppInFreeform(request) => {
                let key = service
                    .start_app_in_freeform(caller, request)
                    .map_err(fmt_error)?;
                Response::Started { key }
            }
            Request::RemoveFreeform { key } => {
                service.remove_freeform(caller, &key).map_err(fmt_error)?;
                Response::Handled
            }
            Request::InjectInput { display_id, event } => {
                service
                    .inject_input(caller, display_id, event)
                    .map_err(fmt_error)?;
                Response::Handled
            }
        };

        Ok(response)
    }
}

fn open_surface(
    surfaces: &dyn SurfaceProvider,
    name: Option<&str>,
) -> Result<Option<Box<dyn RenderTarget>>, String> {
    name.map(|name| {
        surfaces
            .open_surface(name)
            .map_err(|err| format!("error opening surface {name:?}: {err:#}"))
    })
    .transpose()
}

fn fmt_error(err: crate::Error) -> String {
    format!("{err:#}")
}

impl ConnectionCallback {
    fn send(&self, event: Event) -> anyhow::Result<()> {
        self.events
            .send((self.connection, event))
            .map_err(|_| anyhow::anyhow!("IPC server is gone"))
    }

    fn handle(&self) -> u64 {
        self.client.id().get()
    }
}

impl DisplayCallback for ConnectionCallback {
    fn client(&self) -> &ClientHandle {
        &self.client
    }

    fn on_display_added(&self, display_id: u32) -> anyhow::Result<()> {
        self.send(Event::DisplayAdded {
            handle: self.handle(),
            display_id,
        })
    }

    fn on_display_paused(&self) -> anyhow::Result<()> {
        self.send(Event::DisplayPaused {
            handle: self.handle(),
        })
    }

    fn on_display_resumed(&self) -> anyhow::Result<()> {
        self.send(Event::DisplayResumed {
            handle: self.handle(),
        })
    }

    fn on_display_stopped(&self) -> anyhow::Result<()> {
        self.send(Event::DisplayStopped {
            handle: self.handle(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use calloop::{EventLoop, LoopSignal};
    use freeform_config::WindowPolicy;
    use freeform_ipc::socket::Socket;
    use freeform_ipc::{CreateFreeform, InputEvent};

    use super::*;
    use crate::backend::Headless;
    use crate::display::{AdapterOptions, FreeformDisplayAdapter};
    use crate::services::ServiceGate;
    use crate::utils::current_uid;
    use crate::window::FreeformWindowManager;

    static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn socket_path() -> PathBuf {
        let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        env::temp_dir().join(format!("freeform-test.{}.{n}.sock", process::id()))
    }

    /// Server running on its own event loop thread.
    struct TestServer {
        socket_path: PathBuf,
        service: FreeformService,
        headless: Headless,
        signal: LoopSignal,
        thread: Option<JoinHandle<()>>,
    }

    impl TestServer {
        fn start(privileged_uid: u32) -> Self {
            let headless = Headless::new();
            let adapter = FreeformDisplayAdapter::new(
                Arc::new(headless.clone()),
                AdapterOptions {
                    added_delay: Duration::from_millis(10),
                    unique_id_prefix: String::from("freeform:"),
                },
            );
            let gate = ServiceGate::new();
            gate.try_acquire(&headless, |_| ());
            let windows =
                FreeformWindowManager::new(adapter.clone(), gate.clone(), WindowPolicy::SingleSlot);
            let service = FreeformService::new(adapter, windows, gate, privileged_uid, 1_666_666);

            let socket_path = socket_path();
            let (tx, rx) = mpsc::channel();
            let thread = {
                let service = service.clone();
                let surfaces = Arc::new(headless.clone());
                let socket_path = socket_path.clone();
                thread::spawn(move || {
                    let mut event_loop = EventLoop::<()>::try_new().unwrap();
                    let server = IpcServer::start(
                        &event_loop.handle(),
                        service,
                        surfaces,
                        Some(socket_path),
                    )
                    .unwrap();
                    tx.send(event_loop.get_signal()).unwrap();
                    event_loop.run(None, &mut (), |_| ()).unwrap();
                    drop(server);
                })
            };
            let signal = rx.recv().unwrap();

            Self {
                socket_path,
                service,
                headless,
                signal,
                thread: Some(thread),
            }
        }

        fn connect(&self) -> Socket {
            Socket::connect_to(&self.socket_path).unwrap()
        }

        fn stop(&mut self) {
            self.signal.stop();
            self.signal.wakeup();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn create_request(surface: Option<&str>) -> Request {
        Request::CreateFreeform(CreateFreeform {
            name: String::from("ipc"),
            width: 1280,
            height: 720,
            density_dpi: 320,
            secure: false,
            own_content_only: true,
            should_show_system_decorations: false,
            surface: surface.map(str::to_owned),
            refresh_rate: 60.,
            user_id: 0,
        })
    }

    fn read_message(reader: &mut impl BufRead) -> ServerMessage {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[track_caller]
    fn wait_for(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn version_and_ping() {
        let server = TestServer::start(current_uid());
        let mut socket = server.connect();

        assert_eq!(
            socket.send(Request::Version).unwrap(),
            Ok(Response::Version(version()))
        );
        assert_eq!(socket.send(Request::Ping).unwrap(), Ok(Response::Ping(true)));
    }

    #[test]
    fn display_lifecycle_over_socket() {
        let server = TestServer::start(current_uid());
        let service = &server.service;
        let mut socket = server.connect();

        let reply = socket.send(create_request(Some("client-surface"))).unwrap();
        let Ok(Response::Created { handle }) = reply else {
            panic!("unexpected reply: {reply:?}");
        };

        let Event::DisplayAdded { handle: added, display_id } = socket.read_event().unwrap()
        else {
            panic!("expected added event");
        };
        assert_eq!(added, handle);

        let Ok(Response::Displays(displays)) = socket.send(Request::Displays).unwrap() else {
            panic!("expected displays");
        };
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].handle, handle);
        assert_eq!(displays[0].logical_id, Some(display_id));

        let reply = socket
            .send(Request::ResizeFreeform {
                handle,
                width: 800,
                height: 600,
                density_dpi: 240,
            })
            .unwrap();
        assert_eq!(reply, Ok(Response::Handled));
        let info = service
            .adapter()
            .device_info(ClientId::specific(handle))
            .unwrap();
        assert_eq!((info.width, info.height), (800, 600));

        let reply = socket
            .send(Request::SetFreeformSurface {
                handle,
                surface: None,
            })
            .unwrap();
        assert_eq!(reply, Ok(Response::Handled));
        assert_eq!(
            socket.read_event().unwrap(),
            Event::DisplayPaused { handle }
        );

        let reply = socket.send(Request::ReleaseFreeform { handle }).unwrap();
        assert_eq!(reply, Ok(Response::Handled));
        assert_eq!(
            socket.read_event().unwrap(),
            Event::DisplayStopped { handle }
        );

        assert!(service.adapter().is_empty());
        assert_eq!(server.headless.released_surfaces(), ["client-surface"]);
    }

    #[test]
    fn closing_connection_tears_down_displays() {
        let server = TestServer::start(current_uid());
        let mut socket = server.connect();

        let reply = socket.send(create_request(None)).unwrap();
        assert!(matches!(reply, Ok(Response::Created { .. })));
        assert_eq!(server.service.adapter().len(), 1);

        drop(socket);
        wait_for(|| {
            server.service.adapter().is_empty() && server.headless.destroyed_displays().len() == 1
        });
        assert!(server.headless.live_displays().is_empty());
    }

    #[test]
    fn clients_are_served_side_by_side() {
        let server = TestServer::start(current_uid());

        // An idle connection must not hold up the others.
        let mut idle = UnixStream::connect(&server.socket_path).unwrap();
        idle.write_all(b"\"Ver").unwrap();

        let mut first = server.connect();
        let mut second = server.connect();
        assert_eq!(first.send(Request::Ping).unwrap(), Ok(Response::Ping(true)));
        assert_eq!(second.send(Request::Ping).unwrap(), Ok(Response::Ping(true)));

        // The rest of the line completes the request.
        idle.write_all(b"sion\"\n").unwrap();
        let mut reader = BufReader::new(idle);
        assert_eq!(
            read_message(&mut reader),
            ServerMessage::Reply(Ok(Response::Version(version())))
        );
    }

    #[test]
    fn pipelined_requests_get_replies_in_order() {
        let server = TestServer::start(current_uid());
        let mut stream = UnixStream::connect(&server.socket_path).unwrap();
        stream
            .write_all(b"\"Version\"\n\n\"Ping\"\nnot json\n")
            .unwrap();

        let mut reader = BufReader::new(stream);
        assert_eq!(
            read_message(&mut reader),
            ServerMessage::Reply(Ok(Response::Version(version())))
        );
        assert_eq!(
            read_message(&mut reader),
            ServerMessage::Reply(Ok(Response::Ping(true)))
        );
        assert!(matches!(
            read_message(&mut reader),
            ServerMessage::Reply(Err(_))
        ));
    }

    #[test]
    fn unprivileged_peer_is_rejected() {
        let server = TestServer::start(current_uid().wrapping_add(1));
        let mut socket = server.connect();

        let reply = socket.send(create_request(None)).unwrap();
        let err = reply.unwrap_err();
        assert!(err.contains("not allowed"), "{err}");

        let reply = socket
            .send(Request::InjectInput {
                display_id: 0,
                event: InputEvent::Key {
                    keycode: 1,
                    pressed: true,
                },
            })
            .unwrap();
        assert!(reply.is_err());
        assert!(server.service.adapter().is_empty());

        // Version needs no privileges.
        assert!(socket.send(Request::Version).unwrap().is_ok());
    }

    #[test]
    fn malformed_request_gets_error_reply() {
        let server = TestServer::start(current_uid());
        let mut stream = UnixStream::connect(&server.socket_path).unwrap();
        stream.write_all(b"{\"Bogus\":1}\n").unwrap();

        let mut reader = BufReader::new(stream);
        assert!(matches!(
            read_message(&mut reader),
            ServerMessage::Reply(Err(_))
        ));
    }

    #[test]
    fn socket_is_removed_on_drop() {
        let mut server = TestServer::start(current_uid());
        let path = server.socket_path.clone();
        assert!(path.exists());
        server.stop();
        assert!(!path.exists());
    }
}
