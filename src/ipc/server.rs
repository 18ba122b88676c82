//! The daemon side of the IPC socket.
//!
//! Binds a Unix stream socket and serves each accepted connection on its
//! own thread.  A connection carries exactly one request line and receives
//! exactly one response line:
//!
//! ```text
//! accept → read one line → decode → dispatch → encode → write → close
//! ```
//!
//! Every failure after accept turns into an ERROR response; nothing a
//! client sends can take the accept loop down.

use crate::config::{Config, SharedConfig};
use crate::ipc::paths::RuntimeDirError;
use crate::ipc::protocol::{
    decode, encode, ApplyLayoutPayload, CommandType, LayoutsData, MonitorData, MonitorsData,
    PreviewLayoutPayload, ProtocolError, Request, Response, SetDefaultLayoutPayload, StatusData,
};
use crate::traits::{ConfigStore, DisplayProvider, Tiler};
use log::{debug, error, info, warn};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Preview length used when the client asks for a non-positive duration.
pub const DEFAULT_PREVIEW: Duration = Duration::from_secs(3);

/// Longest preview the daemon will schedule.
pub const MAX_PREVIEW: Duration = Duration::from_secs(60);

/// Map a requested preview length onto `(0s, 60s]`.
pub fn clamp_preview_duration(seconds: i64) -> Duration {
    if seconds <= 0 {
        DEFAULT_PREVIEW
    } else {
        Duration::from_secs(seconds as u64).min(MAX_PREVIEW)
    }
}

/// Fatal server errors.  Only startup can produce these.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    RuntimeDir(#[from] RuntimeDirError),
    #[error("cannot bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot set permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single request failed.  Rendered into the ERROR response.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("layout not found: {0}")]
    UnknownLayout(String),
    #[error("no layout given and no default layout configured")]
    NoLayout,
    #[error("{context}: {message}")]
    Collaborator {
        context: &'static str,
        message: String,
    },
}

fn collaborator<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> CommandError {
    move |e| CommandError::Collaborator {
        context,
        message: e.to_string(),
    }
}

//  Reload mailbox

/// Single-slot "config changed" signal.
///
/// This is **lossy**: [`notify`](ReloadNotifier::notify) never blocks, and
/// when a previous signal is still pending the new one is dropped.  A
/// receiver must treat a signal as "re-read the config", not as one event
/// per reload.
#[derive(Debug, Clone)]
pub struct ReloadNotifier {
    tx: mpsc::SyncSender<()>,
}

impl ReloadNotifier {
    /// Create a notifier and the receiving end of its one-slot mailbox.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Self { tx }, rx)
    }

    /// Post a signal.  Returns `false` when it was dropped because the slot
    /// was full or nobody listens.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(())) => {
                debug!("reload signal already pending, dropping");
                false
            }
            Err(mpsc::TrySendError::Disconnected(())) => false,
        }
    }
}

//  Shared daemon state

/// Everything a connection thread may touch.
struct Daemon<T, D, S> {
    config: SharedConfig,
    tiler: T,
    display: D,
    store: S,
    started: Instant,
    reload: ReloadNotifier,
}

impl<T: Tiler, D: DisplayProvider, S: ConfigStore> Daemon<T, D, S> {
    fn read_config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, Config> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, request: &Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("{} failed: {}", request.command, e);
                Response::error(e.to_string())
            }
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Response, CommandError> {
        match &request.command {
            CommandType::Reload => self.reload(),
            CommandType::GetStatus => self.status(),
            CommandType::GetMonitors => self.monitors(),
            CommandType::PreviewLayout => self.preview_layout(request.payload()?),
            CommandType::ListLayouts => self.list_layouts(),
            CommandType::ApplyLayout => self.apply_layout(request.payload()?),
            CommandType::SetDefaultLayout => self.set_default_layout(request.payload()?),
            CommandType::Undo => {
                self.tiler
                    .undo_current_monitor()
                    .map_err(collaborator("undo failed"))?;
                Ok(Response::ok())
            }
            CommandType::Unknown(name) => Err(ProtocolError::UnknownCommand(name.clone()).into()),
        }
    }

    fn reload(&self) -> Result<Response, CommandError> {
        let fresh = self
            .store
            .load()
            .map_err(collaborator("failed to reload config"))?;
        *self.write_config() = fresh;
        info!("config reloaded");
        self.reload.notify();
        Ok(Response::ok())
    }

    fn status(&self) -> Result<Response, CommandError> {
        let terminal_count = match self.display.active_display() {
            Ok(display) => self.tiler.terminal_count(display.id),
            Err(e) => {
                debug!("no active display for status: {}", e);
                0
            }
        };
        let data = StatusData {
            active_layout: self.tiler.active_layout_name(),
            terminal_count: terminal_count as u64,
            uptime_seconds: self.started.elapsed().as_secs(),
            daemon_running: true,
        };
        Ok(Response::ok_with(&data)?)
    }

    fn monitors(&self) -> Result<Response, CommandError> {
        let displays = self
            .display
            .displays()
            .map_err(collaborator("failed to query displays"))?;
        let monitors = displays
            .into_iter()
            .map(|d| MonitorData {
                id: d.id,
                name: d.name,
                x: d.x,
                y: d.y,
                width: d.width,
                height: d.height,
            })
            .collect();
        Ok(Response::ok_with(&MonitorsData { monitors })?)
    }

    fn preview_layout(&self, payload: PreviewLayoutPayload) -> Result<Response, CommandError> {
        let name = if payload.layout_name.is_empty() {
            self.read_config().default_layout.clone()
        } else {
            payload.layout_name
        };
        if name.is_empty() {
            return Err(CommandError::NoLayout);
        }
        let duration = clamp_preview_duration(payload.duration_seconds);
        debug!("previewing {} for {:?}", name, duration);
        self.tiler
            .preview_layout(&name, duration)
            .map_err(collaborator("preview failed"))?;
        Ok(Response::ok())
    }

    fn list_layouts(&self) -> Result<Response, CommandError> {
        let (layouts, default_layout) = {
            let config = self.read_config();
            (config.layout_names(), config.default_layout.clone())
        };
        let data = LayoutsData {
            layouts,
            default_layout,
            active_layout: self.tiler.active_layout_name(),
        };
        Ok(Response::ok_with(&data)?)
    }

    fn apply_layout(&self, payload: ApplyLayoutPayload) -> Result<Response, CommandError> {
        if payload.layout_name.is_empty() {
            return Err(CommandError::MissingField("layout_name"));
        }
        self.tiler
            .set_active_layout(&payload.layout_name)
            .map_err(collaborator("failed to set layout"))?;
        if payload.tile_now {
            let tiled = match payload.window_order.as_deref() {
                Some(order) if !order.is_empty() => self.tiler.tile_with_order(order),
                _ => self.tiler.tile_current_monitor(),
            };
            tiled.map_err(collaborator("tiling failed"))?;
        }
        Ok(Response::ok())
    }

    fn set_default_layout(&self, payload: SetDefaultLayoutPayload) -> Result<Response, CommandError> {
        let name = payload.layout_name;
        if name.is_empty() {
            return Err(CommandError::MissingField("layout_name"));
        }
        {
            let mut config = self.write_config();
            if !config.has_layout(&name) {
                return Err(CommandError::UnknownLayout(name));
            }
            let previous = std::mem::replace(&mut config.default_layout, name.clone());
            if let Err(e) = self.store.save(&config) {
                config.default_layout = previous;
                return Err(collaborator("failed to save config")(e));
            }
        }
        info!("default layout set to {}", name);

        if let Err(e) = self.tiler.set_active_layout(&name) {
            warn!("could not activate new default {}: {}", name, e);
        }
        if payload.tile_now {
            self.tiler
                .tile_current_monitor()
                .map_err(collaborator("tiling failed"))?;
        }
        Ok(Response::ok())
    }
}

//  Server

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shutdown: Arc<Mutex<bool>>,
    path: PathBuf,
}

impl StopHandle {
    /// Ask the accept loop to exit.
    ///
    /// The flag is raised first, then the blocked `accept` is woken by a
    /// throwaway connection, so the loop sees the flag and leaves quietly.
    pub fn stop(&self) {
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = true;
        let _ = UnixStream::connect(&self.path);
    }
}

/// The IPC server.
///
/// Owns the listening socket and the daemon state.  The layout config is
/// shared with the collaborators through [`SharedConfig`].
pub struct Server<T, D, S> {
    path: PathBuf,
    listener: UnixListener,
    daemon: Arc<Daemon<T, D, S>>,
    shutdown: Arc<Mutex<bool>>,
    reload_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl<T, D, S> Server<T, D, S>
where
    T: Tiler + 'static,
    D: DisplayProvider + 'static,
    S: ConfigStore + 'static,
{
    /// Bind the socket at `path`.
    ///
    /// A stale socket file is removed first; the new one is made
    /// owner-only (`0600`).
    pub fn bind(
        path: impl AsRef<Path>,
        config: SharedConfig,
        tiler: T,
        display: D,
        store: S,
    ) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(
            |source| ServerError::Permissions {
                path: path.clone(),
                source,
            },
        )?;
        info!("listening on {}", path.display());

        let (reload, reload_rx) = ReloadNotifier::channel();
        Ok(Self {
            path,
            listener,
            daemon: Arc::new(Daemon {
                config,
                tiler,
                display,
                store,
                started: Instant::now(),
                reload,
            }),
            shutdown: Arc::new(Mutex::new(false)),
            reload_rx: Mutex::new(Some(reload_rx)),
        })
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A handle that can stop [`run`](Server::run) from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: self.shutdown.clone(),
            path: self.path.clone(),
        }
    }

    /// Take the receiving end of the reload mailbox.  Only the first call
    /// returns `Some`.
    pub fn take_reload_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.reload_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Process one request in-process, exactly as a socket client would
    /// see it.
    pub fn handle_request(&self, request: &Request) -> Response {
        self.daemon.handle(request)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the accept loop.
    ///
    /// This method **blocks** until [`StopHandle::stop`] is called.  The
    /// socket file is removed on the way out.  Accept failures are logged
    /// and the loop keeps going.
    pub fn run(self) {
        for stream in self.listener.incoming() {
            if self.shutting_down() {
                break;
            }
            match stream {
                Ok(stream) => {
                    debug!("client connected");
                    let daemon = self.daemon.clone();
                    let spawned = std::thread::Builder::new()
                        .name("termtile-conn".into())
                        .spawn(move || serve_connection(&daemon, stream));
                    if let Err(e) = spawned {
                        error!("cannot spawn connection thread: {}", e);
                    }
                }
                Err(e) => error!("accept error: {}", e),
            }
        }

        info!("server stopped");
        drop(self.listener);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve_connection<T, D, S>(daemon: &Daemon<T, D, S>, stream: UnixStream)
where
    T: Tiler,
    D: DisplayProvider,
    S: ConfigStore,
{
    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    let response = match reader.read_line(&mut line) {
        Ok(0) => {
            debug!("client disconnected without a request");
            return;
        }
        Ok(_) => match decode::<Request>(&line) {
            Ok(request) => {
                debug!("received {}", request.command);
                daemon.handle(&request)
            }
            Err(e) => {
                warn!("bad request: {}", e);
                Response::error(e.to_string())
            }
        },
        Err(e) => {
            warn!("read error: {}", e);
            Response::error(format!("read error: {}", e))
        }
    };

    let encoded = match encode(&response) {
        Ok(line) => line,
        Err(e) => {
            error!("cannot encode response: {}", e);
            return;
        }
    };
    if let Err(e) = (&stream).write_all(encoded.as_bytes()) {
        debug!("client went away before the response: {}", e);
    }
}

//  Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::traits::Display;
    use serde_json::{json, Value};
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};

    //  Mock collaborators

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SetActive(String),
        TileCurrent,
        TileOrder(Vec<u32>),
        Preview(String, Duration),
        Undo,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("mock failure: {0}")]
    struct MockError(String);

    /// Records every call; `terminals` is what `terminal_count` reports.
    #[derive(Default)]
    struct RecorderTiler {
        calls: Arc<Mutex<Vec<Call>>>,
        active: Mutex<String>,
        terminals: usize,
        fail_tiling: bool,
    }

    impl Tiler for RecorderTiler {
        type Error = MockError;

        fn active_layout_name(&self) -> String {
            self.active.lock().unwrap().clone()
        }

        fn set_active_layout(&self, name: &str) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::SetActive(name.into()));
            *self.active.lock().unwrap() = name.into();
            Ok(())
        }

        fn tile_current_monitor(&self) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::TileCurrent);
            if self.fail_tiling {
                return Err(MockError("no windows".into()));
            }
            Ok(())
        }

        fn tile_with_order(&self, order: &[u32]) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::TileOrder(order.to_vec()));
            Ok(())
        }

        fn preview_layout(&self, name: &str, duration: Duration) -> Result<(), MockError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Preview(name.into(), duration));
            Ok(())
        }

        fn undo_current_monitor(&self) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::Undo);
            Err(MockError("nothing to undo".into()))
        }

        fn terminal_count(&self, _display_id: u32) -> usize {
            self.terminals
        }
    }

    struct FixedDisplays(Vec<Display>);

    impl DisplayProvider for FixedDisplays {
        type Error = MockError;

        fn active_display(&self) -> Result<Display, MockError> {
            self.0
                .first()
                .cloned()
                .ok_or_else(|| MockError("no displays".into()))
        }

        fn displays(&self) -> Result<Vec<Display>, MockError> {
            Ok(self.0.clone())
        }
    }

    /// Hands out `configs` round-robin on load; remembers every save.
    #[derive(Default)]
    struct MemoryStore {
        configs: Vec<Config>,
        next: AtomicUsize,
        saved: Arc<Mutex<Vec<Config>>>,
        fail_save: bool,
    }

    impl ConfigStore for MemoryStore {
        type Error = MockError;

        fn load(&self) -> Result<Config, MockError> {
            if self.configs.is_empty() {
                return Err(MockError("config file unreadable".into()));
            }
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(self.configs[i % self.configs.len()].clone())
        }

        fn save(&self, config: &Config) -> Result<(), MockError> {
            if self.fail_save {
                return Err(MockError("disk full".into()));
            }
            self.saved.lock().unwrap().push(config.clone());
            Ok(())
        }
    }

    //  Helpers

    fn config_with(default: &str, names: &[&str]) -> Config {
        let mut config = Config::default();
        config.default_layout = default.into();
        for name in names {
            config.layouts.insert(name.to_string(), Layout::default());
        }
        config
    }

    fn one_display() -> FixedDisplays {
        FixedDisplays(vec![Display {
            id: 0,
            name: "DP-1".into(),
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }])
    }

    type TestServer = Server<RecorderTiler, FixedDisplays, MemoryStore>;

    fn bind(
        dir: &tempfile::TempDir,
        config: Config,
        tiler: RecorderTiler,
        store: MemoryStore,
    ) -> TestServer {
        Server::bind(
            dir.path().join("termtile.sock"),
            config.into_shared(),
            tiler,
            one_display(),
            store,
        )
        .unwrap()
    }

    fn request(json: Value) -> Request {
        serde_json::from_value(json).unwrap()
    }

    /// Send one raw line and read the raw response line.
    fn exchange(path: &Path, line: &str) -> String {
        let mut stream = UnixStream::connect(path).expect("connect");
        stream.write_all(line.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn spawn(server: TestServer) -> (StopHandle, std::thread::JoinHandle<()>) {
        let stop = server.stop_handle();
        let handle = std::thread::spawn(move || server.run());
        (stop, handle)
    }

    //  Preview clamp

    #[test]
    fn preview_duration_clamp() {
        assert_eq!(clamp_preview_duration(0), Duration::from_secs(3));
        assert_eq!(clamp_preview_duration(-5), Duration::from_secs(3));
        assert_eq!(clamp_preview_duration(120), Duration::from_secs(60));
        assert_eq!(clamp_preview_duration(10), Duration::from_secs(10));
        assert_eq!(clamp_preview_duration(60), Duration::from_secs(60));
        assert_eq!(clamp_preview_duration(i64::MAX), Duration::from_secs(60));
    }

    //  Socket scenarios

    #[test]
    fn get_status_with_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let path = server.path().to_path_buf();
        let (stop, handle) = spawn(server);

        let raw = exchange(&path, "{\"command\":\"GET_STATUS\"}\n");
        assert!(raw.ends_with('\n'));
        let value: Value = serde_json::from_str(&raw).unwrap();
        let uptime = value["data"]["uptime_seconds"].as_u64().expect("uptime");
        assert_eq!(
            raw,
            format!(
                "{{\"status\":\"OK\",\"data\":{{\"active_layout\":\"\",\"terminal_count\":0,\"uptime_seconds\":{},\"daemon_running\":true}}}}\n",
                uptime
            )
        );
        assert_eq!(
            value,
            json!({
                "status": "OK",
                "data": {
                    "active_layout": "",
                    "terminal_count": 0,
                    "uptime_seconds": uptime,
                    "daemon_running": true
                }
            })
        );

        stop.stop();
        handle.join().unwrap();
    }

    #[test]
    fn apply_layout_without_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler::default();
        let calls = tiler.calls.clone();
        let server = bind(&dir, Config::default(), tiler, MemoryStore::default());
        let path = server.path().to_path_buf();
        let (stop, handle) = spawn(server);

        let raw = exchange(
            &path,
            "{\"command\":\"APPLY_LAYOUT\",\"payload\":{\"layout_name\":\"\"}}\n",
        );
        assert_eq!(raw, "{\"status\":\"ERROR\",\"error\":\"layout_name is required\"}\n");
        assert!(calls.lock().unwrap().is_empty());

        stop.stop();
        handle.join().unwrap();
    }

    #[test]
    fn malformed_json_gets_error_and_server_survives() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let path = server.path().to_path_buf();
        let (stop, handle) = spawn(server);

        let raw = exchange(&path, "not json at all\n");
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "ERROR");
        assert!(value["error"].as_str().unwrap().starts_with("malformed message"));
        assert!(value.get("data").is_none());

        let raw = exchange(&path, "{\"command\":\"LIST_LAYOUTS\"}\n");
        assert!(raw.starts_with("{\"status\":\"OK\""));

        stop.stop();
        handle.join().unwrap();
    }

    #[test]
    fn client_hanging_up_early_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let path = server.path().to_path_buf();
        let (stop, handle) = spawn(server);

        drop(UnixStream::connect(&path).unwrap());
        let raw = exchange(&path, "{\"command\":\"GET_STATUS\"}\n");
        assert!(raw.starts_with("{\"status\":\"OK\""));

        stop.stop();
        handle.join().unwrap();
    }

    #[test]
    fn stop_while_blocked_in_accept() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let path = server.path().to_path_buf();
        let (stop, handle) = spawn(server);

        std::thread::sleep(Duration::from_millis(100));
        stop.stop();
        handle.join().unwrap();

        assert!(!path.exists(), "socket file left behind");
        assert!(UnixStream::connect(&path).is_err());
    }

    #[test]
    fn socket_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let mode = std::fs::metadata(server.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("termtile.sock"), b"stale").unwrap();
        let _server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
    }

    //  Dispatch

    #[test]
    fn unknown_command_is_an_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let resp = server.handle_request(&request(json!({"command": "FROBNICATE"})));
        assert_eq!(resp, Response::error("Unknown command: FROBNICATE"));
    }

    #[test]
    fn invalid_payload_is_an_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let resp = server.handle_request(&request(json!({
            "command": "PREVIEW_LAYOUT",
            "payload": {"duration_seconds": "long"}
        })));
        assert!(!resp.is_ok());
        assert!(resp.error.unwrap().starts_with("invalid payload"));
    }

    #[test]
    fn status_reports_terminals_on_active_display() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler {
            terminals: 4,
            ..Default::default()
        };
        *tiler.active.lock().unwrap() = "columns".into();
        let server = bind(&dir, Config::default(), tiler, MemoryStore::default());
        let data: StatusData = server
            .handle_request(&Request::new(CommandType::GetStatus))
            .data()
            .unwrap();
        assert_eq!(data.active_layout, "columns");
        assert_eq!(data.terminal_count, 4);
        assert!(data.daemon_running);
    }

    #[test]
    fn monitors_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let resp = server.handle_request(&Request::new(CommandType::GetMonitors));
        assert_eq!(
            resp.data,
            Some(json!({"monitors": [
                {"id": 0, "name": "DP-1", "x": 0, "y": 0, "width": 1920, "height": 1080}
            ]}))
        );
    }

    #[test]
    fn list_layouts_sorted_with_default_and_active() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler::default();
        *tiler.active.lock().unwrap() = "rows".into();
        let config = config_with("grid", &["rows", "columns", "grid"]);
        let server = bind(&dir, config, tiler, MemoryStore::default());
        let data: LayoutsData = server
            .handle_request(&Request::new(CommandType::ListLayouts))
            .data()
            .unwrap();
        assert_eq!(data.layouts, vec!["columns", "grid", "rows"]);
        assert_eq!(data.default_layout, "grid");
        assert_eq!(data.active_layout, "rows");
    }

    #[test]
    fn preview_falls_back_to_default_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler::default();
        let calls = tiler.calls.clone();
        let server = bind(&dir, config_with("grid", &["grid"]), tiler, MemoryStore::default());

        let resp = server.handle_request(&request(json!({
            "command": "PREVIEW_LAYOUT",
            "payload": {"duration_seconds": 0}
        })));
        assert!(resp.is_ok());
        let resp = server.handle_request(&request(json!({
            "command": "PREVIEW_LAYOUT",
            "payload": {"layout_name": "rows", "duration_seconds": 120}
        })));
        assert!(resp.is_ok());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Preview("grid".into(), Duration::from_secs(3)),
                Call::Preview("rows".into(), Duration::from_secs(60)),
            ]
        );
    }

    #[test]
    fn preview_without_any_layout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let resp = server.handle_request(&Request::new(CommandType::PreviewLayout));
        assert!(!resp.is_ok());
    }

    #[test]
    fn apply_layout_with_explicit_order() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler::default();
        let calls = tiler.calls.clone();
        let server = bind(&dir, Config::default(), tiler, MemoryStore::default());

        let resp = server.handle_request(&request(json!({
            "command": "APPLY_LAYOUT",
            "payload": {"layout_name": "columns", "tile_now": true, "window_order": [3, 1, 2]}
        })));
        assert!(resp.is_ok());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::SetActive("columns".into()), Call::TileOrder(vec![3, 1, 2])]
        );
    }

    #[test]
    fn apply_layout_tiles_default_order_or_not_at_all() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler::default();
        let calls = tiler.calls.clone();
        let server = bind(&dir, Config::default(), tiler, MemoryStore::default());

        server.handle_request(&request(json!({
            "command": "APPLY_LAYOUT",
            "payload": {"layout_name": "a", "tile_now": true}
        })));
        server.handle_request(&request(json!({
            "command": "APPLY_LAYOUT",
            "payload": {"layout_name": "b"}
        })));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::SetActive("a".into()),
                Call::TileCurrent,
                Call::SetActive("b".into()),
            ]
        );
    }

    #[test]
    fn tiling_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tiler = RecorderTiler {
            fail_tiling: true,
            ..Default::default()
        };
        let server = bind(&dir, Config::default(), tiler, MemoryStore::default());
        let resp = server.handle_request(&request(json!({
            "command": "APPLY_LAYOUT",
            "payload": {"layout_name": "a", "tile_now": true}
        })));
        assert_eq!(resp, Response::error("tiling failed: mock failure: no windows"));
    }

    #[test]
    fn undo_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let server = bind(&dir, Config::default(), RecorderTiler::default(), MemoryStore::default());
        let resp = server.handle_request(&Request::new(CommandType::Undo));
        assert_eq!(resp, Response::error("undo failed: mock failure: nothing to undo"));
    }

    #[test]
    fn set_default_unknown_layout_leaves_config_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let saved = store.saved.clone();
        let config = config_with("grid", &["grid"]).into_shared();
        let server = Server::bind(
            dir.path().join("termtile.sock"),
            config.clone(),
            RecorderTiler::default(),
            one_display(),
            store,
        )
        .unwrap();

        let resp = server.handle_request(&request(json!({
            "command": "SET_DEFAULT_LAYOUT",
            "payload": {"layout_name": "missing"}
        })));
        assert_eq!(resp, Response::error("layout not found: missing"));
        assert_eq!(*config.read().unwrap(), config_with("grid", &["grid"]));
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn set_default_persists_and_activates() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let saved = store.saved.clone();
        let tiler = RecorderTiler::default();
        let calls = tiler.calls.clone();
        let config = config_with("grid", &["grid", "rows"]).into_shared();
        let server = Server::bind(
            dir.path().join("termtile.sock"),
            config.clone(),
            tiler,
            one_display(),
            store,
        )
        .unwrap();

        let resp = server.handle_request(&request(json!({
            "command": "SET_DEFAULT_LAYOUT",
            "payload": {"layout_name": "rows", "tile_now": true}
        })));
        assert!(resp.is_ok());
        assert_eq!(config.read().unwrap().default_layout, "rows");
        assert_eq!(saved.lock().unwrap().len(), 1);
        assert_eq!(saved.lock().unwrap()[0].default_layout, "rows");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::SetActive("rows".into()), Call::TileCurrent]
        );
    }

    #[test]
    fn set_default_save_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore {
            fail_save: true,
            ..Default::default()
        };
        let config = config_with("grid", &["grid", "rows"]).into_shared();
        let server = Server::bind(
            dir.path().join("termtile.sock"),
            config.clone(),
            RecorderTiler::default(),
            one_display(),
            store,
        )
        .unwrap();

        let resp = server.handle_request(&request(json!({
            "command": "SET_DEFAULT_LAYOUT",
            "payload": {"layout_name": "rows"}
        })));
        assert_eq!(resp, Response::error("failed to save config: mock failure: disk full"));
        assert_eq!(config.read().unwrap().default_layout, "grid");
    }

    #[test]
    fn reload_replaces_config_and_signals_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore {
            configs: vec![config_with("fresh", &["fresh"])],
            ..Default::default()
        };
        let config = Config::default().into_shared();
        let server = Server::bind(
            dir.path().join("termtile.sock"),
            config.clone(),
            RecorderTiler::default(),
            one_display(),
            store,
        )
        .unwrap();
        let rx = server.take_reload_receiver().unwrap();
        assert!(server.take_reload_receiver().is_none());

        // Nobody drains the mailbox: the second signal is dropped, not queued.
        assert!(server.handle_request(&Request::new(CommandType::Reload)).is_ok());
        assert!(server.handle_request(&Request::new(CommandType::Reload)).is_ok());

        assert_eq!(config.read().unwrap().default_layout, "fresh");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reload_failure_keeps_old_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with("grid", &["grid"]).into_shared();
        let server = Server::bind(
            dir.path().join("termtile.sock"),
            config.clone(),
            RecorderTiler::default(),
            one_display(),
            MemoryStore::default(),
        )
        .unwrap();
        let resp = server.handle_request(&Request::new(CommandType::Reload));
        assert_eq!(
            resp,
            Response::error("failed to reload config: mock failure: config file unreadable")
        );
        assert_eq!(config.read().unwrap().default_layout, "grid");
    }

    #[test]
    fn list_never_sees_a_mixed_config_during_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore {
            configs: vec![config_with("a1", &["a1", "a2"]), config_with("b1", &["b1"])],
            ..Default::default()
        };
        let server = bind(&dir, config_with("a1", &["a1", "a2"]), RecorderTiler::default(), store);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        server.handle_request(&Request::new(CommandType::Reload));
                    }
                });
            }
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let data: LayoutsData = server
                            .handle_request(&Request::new(CommandType::ListLayouts))
                            .data()
                            .unwrap();
                        assert!(
                            data.layouts.contains(&data.default_layout),
                            "default {} not in {:?}",
                            data.default_layout,
                            data.layouts
                        );
                    }
                });
            }
        });
    }

    #[test]
    fn notifier_drops_when_full() {
        let (notifier, rx) = ReloadNotifier::channel();
        assert!(notifier.notify());
        assert!(!notifier.notify());
        rx.recv().unwrap();
        assert!(notifier.notify());
        drop(rx);
        assert!(!notifier.notify());
    }
}
