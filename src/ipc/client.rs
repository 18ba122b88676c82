//! Client side of the daemon socket.
//!
//! One call is one connection: connect, write one request line, read one
//! response line, close.  Writing and reading share a single deadline that
//! starts right after the connection is established.

use crate::ipc::protocol::{
    decode, encode, ApplyLayoutPayload, CommandType, LayoutsData, MonitorData, MonitorsData,
    PreviewLayoutPayload, ProtocolError, Request, Response, SetDefaultLayoutPayload, StatusData,
};
use log::debug;
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Round-trip budget used by [`Client::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from a client call, by phase.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Nothing is listening on the socket.
    #[error("daemon unreachable at {path} (is `termtile daemon` running?): {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode request: {0}")]
    Encode(#[source] ProtocolError),
    #[error("failed to send request: {0}")]
    Send(#[source] std::io::Error),
    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),
    #[error("daemon closed the connection without responding")]
    NoResponse,
    #[error("failed to parse response: {0}")]
    Parse(#[source] ProtocolError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The daemon answered with an ERROR response.
    #[error("daemon error: {0}")]
    Daemon(String),
}

impl ClientError {
    /// Whether the daemon could not be reached at all (as opposed to
    /// rejecting the request).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }
}

/// Synchronous client for the daemon socket.
#[derive(Debug, Clone)]
pub struct Client {
    path: PathBuf,
    timeout: Duration,
}

impl Client {
    /// A client for the socket at `path` with the default 5s timeout.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_timeout(path, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Perform one round trip and return the raw response, whatever its
    /// status.
    pub fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.path).map_err(|source| ClientError::Unreachable {
            path: self.path.clone(),
            source,
        })?;
        let deadline = Instant::now() + self.timeout;

        let line = encode(request).map_err(ClientError::Encode)?;
        stream
            .set_write_timeout(Some(self.remaining(deadline)?))
            .map_err(ClientError::Send)?;
        (&stream)
            .write_all(line.as_bytes())
            .map_err(|e| self.io_error(e, ClientError::Send))?;
        debug!("sent {}", request.command);

        stream
            .set_read_timeout(Some(self.remaining(deadline)?))
            .map_err(ClientError::Read)?;
        let mut reader = BufReader::new(&stream);
        let mut response = String::new();
        let n = reader
            .read_line(&mut response)
            .map_err(|e| self.io_error(e, ClientError::Read))?;
        if n == 0 {
            return Err(ClientError::NoResponse);
        }
        decode(&response).map_err(ClientError::Parse)
    }

    fn remaining(&self, deadline: Instant) -> Result<Duration, ClientError> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(ClientError::Timeout(self.timeout));
        }
        Ok(left)
    }

    fn io_error(&self, e: std::io::Error, wrap: fn(std::io::Error) -> ClientError) -> ClientError {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ClientError::Timeout(self.timeout)
            }
            _ => wrap(e),
        }
    }

    /// Send `request` and turn an ERROR response into [`ClientError::Daemon`].
    fn call(&self, request: Request) -> Result<Response, ClientError> {
        let response = self.send(&request)?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(ClientError::Daemon(
                response.error.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }

    fn call_for<D: DeserializeOwned>(&self, request: Request) -> Result<D, ClientError> {
        self.call(request)?.data().map_err(ClientError::Parse)
    }

    fn with_payload<P: serde::Serialize>(command: CommandType, payload: &P) -> Result<Request, ClientError> {
        Request::with_payload(command, payload).map_err(ClientError::Encode)
    }

    //  Commands

    /// Make the daemon re-read its config file.
    pub fn reload(&self) -> Result<(), ClientError> {
        self.call(Request::new(CommandType::Reload)).map(drop)
    }

    /// Revert the last tiling of the current monitor.
    pub fn undo(&self) -> Result<(), ClientError> {
        self.call(Request::new(CommandType::Undo)).map(drop)
    }

    pub fn status(&self) -> Result<StatusData, ClientError> {
        self.call_for(Request::new(CommandType::GetStatus))
    }

    pub fn monitors(&self) -> Result<Vec<MonitorData>, ClientError> {
        let data: MonitorsData = self.call_for(Request::new(CommandType::GetMonitors))?;
        Ok(data.monitors)
    }

    /// Preview a layout for `duration_seconds` (the daemon clamps it).  An
    /// empty name previews the default layout.
    pub fn preview_layout(&self, layout_name: &str, duration_seconds: i64) -> Result<(), ClientError> {
        let payload = PreviewLayoutPayload {
            layout_name: layout_name.to_string(),
            duration_seconds,
        };
        self.call(Self::with_payload(CommandType::PreviewLayout, &payload)?)
            .map(drop)
    }

    pub fn list_layouts(&self) -> Result<LayoutsData, ClientError> {
        self.call_for(Request::new(CommandType::ListLayouts))
    }

    /// Activate a layout, optionally tiling right away.  `window_order`
    /// pins the tiling order; `None` lets the daemon choose.
    pub fn apply_layout(
        &self,
        layout_name: &str,
        tile_now: bool,
        window_order: Option<&[u32]>,
    ) -> Result<(), ClientError> {
        let payload = ApplyLayoutPayload {
            layout_name: layout_name.to_string(),
            tile_now,
            window_order: window_order.map(<[u32]>::to_vec),
        };
        self.call(Self::with_payload(CommandType::ApplyLayout, &payload)?)
            .map(drop)
    }

    /// Change and persist the default layout.
    pub fn set_default_layout(&self, layout_name: &str, tile_now: bool) -> Result<(), ClientError> {
        let payload = SetDefaultLayoutPayload {
            layout_name: layout_name.to_string(),
            tile_now,
        };
        self.call(Self::with_payload(CommandType::SetDefaultLayout, &payload)?)
            .map(drop)
    }

    /// Whether the daemon answers a status request.
    pub fn is_running(&self) -> bool {
        self.status().is_ok()
    }
}
