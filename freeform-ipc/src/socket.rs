//! Helper for blocking communication over the freeform control socket.

use std::collections::VecDeque;
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::{Event, Reply, Request, ServerMessage, SOCKET_PATH_ENV};

/// Helper for blocking communication over the freeform control socket.
pub struct Socket {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    events: VecDeque<Event>,
}

impl Socket {
    /// Connects to the default freeform control socket.
    ///
    /// This is equivalent to calling [`Self::connect_to`] with the path taken from the
    /// `$FREEFORM_SOCKET` environment variable.
    pub fn connect() -> io::Result<Self> {
        let socket_path = env::var_os(SOCKET_PATH_ENV).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{SOCKET_PATH_ENV} is not set, is the freeform service running?"),
            )
        })?;
        Self::connect_to(socket_path)
    }

    /// Connects to the freeform control socket at the given path.
    pub fn connect_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let writer = UnixStream::connect(path.as_ref())?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            reader,
            writer,
            events: VecDeque::new(),
        })
    }

    /// Sends a request to the service and waits for its reply.
    ///
    /// Events that arrive before the reply are kept and returned by [`Self::read_event`].
    pub fn send(&mut self, request: Request) -> io::Result<Reply> {
        let mut buf = serde_json::to_string(&request).map_err(io::Error::other)?;
        buf.push('\n');
        self.writer.write_all(buf.as_bytes())?;
        self.writer.flush()?;

        loop {
            match self.read_message()? {
                ServerMessage::Reply(reply) => return Ok(reply),
                ServerMessage::Event(event) => self.events.push_back(event),
            }
        }
    }

    /// Returns the next lifecycle event, blocking until one arrives.
    pub fn read_event(&mut self) -> io::Result<Event> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }

        loop {
            match self.read_message()? {
                ServerMessage::Event(event) => return Ok(event),
                ServerMessage::Reply(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "received a reply without a request",
                    ))
                }
            }
        }
    }

    fn read_message(&mut self) -> io::Result<ServerMessage> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "the service closed the connection",
            ));
        }
        serde_json::from_str(&line).map_err(io::Error::other)
    }
}
