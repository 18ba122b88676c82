//! EWMH desktop and window operations over a raw X11 connection.
//!
//! Reads go through `GetProperty` on the root or client window.  Writes are
//! format-32 `ClientMessage` events sent to the root window with
//! `SubstructureRedirect | SubstructureNotify`, which is how the EWMH asks
//! clients to talk to the window manager.  Every write is built by
//! [`Ewmh::send_client_message`]; the desktop move and the activation are
//! thin wrappers around it.

use crate::traits::WindowSystem;
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClientMessageData, ClientMessageEvent, ConfigureWindowAux,
    ConnectionExt as _, EventMask, Setup, StackMode, Window, CLIENT_MESSAGE_EVENT,
};
use x11rb::rust_connection::RustConnection;

const NET_CURRENT_DESKTOP: &str = "_NET_CURRENT_DESKTOP";
const NET_WM_DESKTOP: &str = "_NET_WM_DESKTOP";
const NET_NUMBER_OF_DESKTOPS: &str = "_NET_NUMBER_OF_DESKTOPS";
const NET_ACTIVE_WINDOW: &str = "_NET_ACTIVE_WINDOW";
const NET_CLIENT_LIST: &str = "_NET_CLIENT_LIST";
const NET_WM_NAME: &str = "_NET_WM_NAME";
const UTF8_STRING: &str = "UTF8_STRING";

/// Desktop number meaning "on all desktops".
pub const STICKY_DESKTOP: i64 = -1;

/// Wire value of [`STICKY_DESKTOP`].
const RAW_STICKY: u32 = 0xFFFF_FFFF;

/// EWMH source indication for requests from pagers and other tools acting
/// on behalf of the user.
pub const SOURCE_PAGER: u32 = 2;

/// Longest property we ever read, in 32-bit units.
const MAX_PROPERTY_LEN: u32 = 1 << 16;

/// Errors talking to the X server.
#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    #[error("cannot connect to the X display: {0}")]
    Connect(#[from] ConnectError),
    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),
    #[error("property {property} is not set on window 0x{window:x}")]
    MissingProperty {
        property: &'static str,
        window: Window,
    },
    #[error("invalid desktop number {0}")]
    InvalidDesktop(i64),
    #[error("no window title contains {0:?}")]
    WindowNotFound(String),
    #[error("no displays reported by the X server")]
    NoDisplays,
    #[error("X server has no screen {0}")]
    NoScreen(usize),
}

/// Translate a raw `_NET_WM_DESKTOP` value, mapping `0xFFFFFFFF` to
/// [`STICKY_DESKTOP`].
pub fn desktop_from_raw(raw: u32) -> i64 {
    if raw == RAW_STICKY {
        STICKY_DESKTOP
    } else {
        i64::from(raw)
    }
}

/// Inverse of [`desktop_from_raw`].  Only `-1` may be negative.
pub fn desktop_to_raw(desktop: i64) -> Result<u32, X11Error> {
    if desktop == STICKY_DESKTOP {
        return Ok(RAW_STICKY);
    }
    u32::try_from(desktop)
        .ok()
        .filter(|&raw| raw != RAW_STICKY)
        .ok_or(X11Error::InvalidDesktop(desktop))
}

/// A format-32 client message about `window`.
pub fn client_message(window: Window, message_type: Atom, data: [u32; 5]) -> ClientMessageEvent {
    ClientMessageEvent {
        response_type: CLIENT_MESSAGE_EVENT,
        format: 32,
        sequence: 0,
        window,
        type_: message_type,
        data: ClientMessageData::from(data),
    }
}

/// Event mask for client messages addressed to the window manager.
pub fn root_message_mask() -> EventMask {
    EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY
}

/// First window whose title contains `needle` (case-sensitive), in
/// iteration order.  An empty needle matches nothing.
pub fn first_title_match<I>(windows: I, needle: &str) -> Option<Window>
where
    I: IntoIterator<Item = (Window, String)>,
{
    if needle.is_empty() {
        return None;
    }
    windows
        .into_iter()
        .find(|(_, title)| title.contains(needle))
        .map(|(window, _)| window)
}

/// Split an ICCCM `WM_CLASS` value (`instance\0class\0`).
pub fn parse_wm_class(value: &[u8]) -> Vec<String> {
    value
        .split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Root window of `screen`, or [`X11Error::NoScreen`] if the server has
/// no such screen.
pub fn root_of(setup: &Setup, screen: usize) -> Result<Window, X11Error> {
    setup
        .roots
        .get(screen)
        .map(|s| s.root)
        .ok_or(X11Error::NoScreen(screen))
}

/// EWMH operations on one connection and its default root window.
///
/// The daemon keeps one long-lived instance; the [`standalone`] functions
/// open a fresh one per call.
pub struct Ewmh<C: Connection> {
    conn: C,
    root: Window,
}

impl Ewmh<RustConnection> {
    /// Connect to `$DISPLAY`.
    pub fn connect() -> Result<Self, X11Error> {
        let (conn, screen) = x11rb::connect(None)?;
        Self::new(conn, screen)
    }
}

impl<C: Connection> Ewmh<C> {
    /// Wrap an existing connection, using the root of `screen`.
    pub fn new(conn: C, screen: usize) -> Result<Self, X11Error> {
        let root = root_of(conn.setup(), screen)?;
        Ok(Self { conn, root })
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    fn atom(&self, name: &str) -> Result<Atom, X11Error> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    /// First 32-bit value of a CARDINAL property.
    fn cardinal(&self, window: Window, property: &'static str) -> Result<u32, X11Error> {
        let atom = self.atom(property)?;
        let reply = self
            .conn
            .get_property(false, window, atom, AtomEnum::CARDINAL, 0, 1)?
            .reply()?;
        reply
            .value32()
            .and_then(|mut values| values.next())
            .ok_or(X11Error::MissingProperty { property, window })
    }

    /// Desktop currently shown (`_NET_CURRENT_DESKTOP`).
    pub fn current_desktop(&self) -> Result<i64, X11Error> {
        Ok(i64::from(self.cardinal(self.root, NET_CURRENT_DESKTOP)?))
    }

    /// Desktop `window` lives on; [`STICKY_DESKTOP`] for sticky windows.
    pub fn window_desktop(&self, window: Window) -> Result<i64, X11Error> {
        Ok(desktop_from_raw(self.cardinal(window, NET_WM_DESKTOP)?))
    }

    /// Number of virtual desktops (`_NET_NUMBER_OF_DESKTOPS`).
    pub fn desktop_count(&self) -> Result<u32, X11Error> {
        self.cardinal(self.root, NET_NUMBER_OF_DESKTOPS)
    }

    /// Send a format-32 client message of type `message_type` about
    /// `window` to the root window, and wait for the server to accept it.
    pub fn send_client_message(
        &self,
        window: Window,
        message_type: &str,
        data: [u32; 5],
    ) -> Result<(), X11Error> {
        let type_ = self.atom(message_type)?;
        let event = client_message(window, type_, data);
        self.conn
            .send_event(false, self.root, root_message_mask(), event)?
            .check()?;
        Ok(())
    }

    /// Ask the window manager to move `window` to `desktop`
    /// ([`STICKY_DESKTOP`] pins it to all desktops).
    pub fn move_window_to_desktop(&self, window: Window, desktop: i64) -> Result<(), X11Error> {
        let raw = desktop_to_raw(desktop)?;
        self.send_client_message(window, NET_WM_DESKTOP, [raw, SOURCE_PAGER, 0, 0, 0])
    }

    /// Ask the window manager to focus `window`, then raise it.
    pub fn activate_window(&self, window: Window) -> Result<(), X11Error> {
        self.send_client_message(
            window,
            NET_ACTIVE_WINDOW,
            [SOURCE_PAGER, x11rb::CURRENT_TIME, 0, 0, 0],
        )?;
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?
            .check()?;
        Ok(())
    }

    /// Managed windows in the order the window manager lists them.
    pub fn client_list(&self) -> Result<Vec<Window>, X11Error> {
        let atom = self.atom(NET_CLIENT_LIST)?;
        let reply = self
            .conn
            .get_property(false, self.root, atom, AtomEnum::WINDOW, 0, MAX_PROPERTY_LEN)?
            .reply()?;
        let windows = reply.value32().ok_or(X11Error::MissingProperty {
            property: NET_CLIENT_LIST,
            window: self.root,
        })?;
        Ok(windows.collect())
    }

    /// Window title from `_NET_WM_NAME`, falling back to `WM_NAME`.
    /// Untitled windows yield `""`.
    pub fn window_title(&self, window: Window) -> Result<String, X11Error> {
        let net_wm_name = self.atom(NET_WM_NAME)?;
        let utf8 = self.atom(UTF8_STRING)?;
        let reply = self
            .conn
            .get_property(false, window, net_wm_name, utf8, 0, MAX_PROPERTY_LEN)?
            .reply()?;
        if !reply.value.is_empty() {
            return Ok(String::from_utf8_lossy(&reply.value).into_owned());
        }

        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, MAX_PROPERTY_LEN)?
            .reply()?;
        Ok(String::from_utf8_lossy(&reply.value).into_owned())
    }

    /// First client whose title contains `needle`.
    ///
    /// Windows that disappear mid-scan are skipped.  An empty needle never
    /// matches.
    pub fn find_window_by_title(&self, needle: &str) -> Result<Window, X11Error> {
        if needle.is_empty() {
            return Err(X11Error::WindowNotFound(String::new()));
        }
        let titled = self.client_list()?.into_iter().filter_map(|window| {
            match self.window_title(window) {
                Ok(title) => Some((window, title)),
                Err(e) => {
                    log::debug!("skipping window 0x{:x}: {}", window, e);
                    None
                }
            }
        });
        first_title_match(titled, needle).ok_or_else(|| X11Error::WindowNotFound(needle.into()))
    }

    /// `WM_CLASS` instance and class names.
    pub fn window_class(&self, window: Window) -> Result<Vec<String>, X11Error> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 256)?
            .reply()?;
        Ok(parse_wm_class(&reply.value))
    }

    /// Top-left corner of `window` in root coordinates.
    pub fn window_origin(&self, window: Window) -> Result<(i32, i32), X11Error> {
        let reply = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)?
            .reply()?;
        Ok((i32::from(reply.dst_x), i32::from(reply.dst_y)))
    }

    /// Width and height of `window`, excluding the border.
    pub fn window_size(&self, window: Window) -> Result<(u32, u32), X11Error> {
        let reply = self.conn.get_geometry(window)?.reply()?;
        Ok((u32::from(reply.width), u32::from(reply.height)))
    }
}

impl<C: Connection + Send + Sync> WindowSystem for Ewmh<C> {
    type Error = X11Error;

    fn current_desktop(&self) -> Result<i64, X11Error> {
        Ewmh::current_desktop(self)
    }

    fn client_list(&self) -> Result<Vec<u32>, X11Error> {
        Ewmh::client_list(self)
    }

    fn window_desktop(&self, window: u32) -> Result<i64, X11Error> {
        Ewmh::window_desktop(self, window)
    }

    fn window_class(&self, window: u32) -> Result<Vec<String>, X11Error> {
        Ewmh::window_class(self, window)
    }

    fn window_origin(&self, window: u32) -> Result<(i32, i32), X11Error> {
        Ewmh::window_origin(self, window)
    }

    fn window_size(&self, window: u32) -> Result<(u32, u32), X11Error> {
        Ewmh::window_size(self, window)
    }

    fn move_window_to_desktop(&self, window: u32, desktop: i64) -> Result<(), X11Error> {
        Ewmh::move_window_to_desktop(self, window, desktop)
    }

    fn activate_window(&self, window: u32) -> Result<(), X11Error> {
        Ewmh::activate_window(self, window)
    }
}

/// One-shot variants that open their own connection.
///
/// The connection is dropped, and its socket closed, before each function
/// returns, whether it succeeds or not.
pub mod standalone {
    use super::{Ewmh, X11Error};
    use x11rb::protocol::xproto::Window;
    use x11rb::rust_connection::RustConnection;

    fn with_ewmh<T>(op: impl FnOnce(&Ewmh<RustConnection>) -> Result<T, X11Error>) -> Result<T, X11Error> {
        let ewmh = Ewmh::connect()?;
        op(&ewmh)
    }

    pub fn current_desktop() -> Result<i64, X11Error> {
        with_ewmh(|e| e.current_desktop())
    }

    pub fn window_desktop(window: Window) -> Result<i64, X11Error> {
        with_ewmh(|e| e.window_desktop(window))
    }

    pub fn desktop_count() -> Result<u32, X11Error> {
        with_ewmh(|e| e.desktop_count())
    }

    pub fn move_window_to_desktop(window: Window, desktop: i64) -> Result<(), X11Error> {
        with_ewmh(|e| e.move_window_to_desktop(window, desktop))
    }

    pub fn activate_window(window: Window) -> Result<(), X11Error> {
        with_ewmh(|e| e.activate_window(window))
    }

    pub fn find_window_by_title(needle: &str) -> Result<Window, X11Error> {
        with_ewmh(|e| e.find_window_by_title(needle))
    }
}
