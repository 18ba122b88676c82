//! [`DisplayProvider`] backed by RandR monitors.

use crate::traits::{Display, DisplayProvider};
use crate::x11::ewmh::{Ewmh, X11Error};
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::ConnectionExt as _;

/// Lists RandR monitors on the daemon's X connection.
///
/// Display ids are positions in the RandR monitor list.
pub struct X11Displays<C: Connection> {
    ewmh: Arc<Ewmh<C>>,
}

impl<C: Connection> X11Displays<C> {
    pub fn new(ewmh: Arc<Ewmh<C>>) -> Self {
        Self { ewmh }
    }

    /// Every monitor plus whether it is the primary one.
    fn monitors(&self) -> Result<Vec<(Display, bool)>, X11Error> {
        let conn = self.ewmh.connection();
        let reply = conn.randr_get_monitors(self.ewmh.root(), true)?.reply()?;
        reply
            .monitors
            .iter()
            .enumerate()
            .map(|(i, m)| -> Result<(Display, bool), X11Error> {
                let name = conn.get_atom_name(m.name)?.reply()?.name;
                let display = Display {
                    id: i as u32,
                    name: String::from_utf8_lossy(&name).into_owned(),
                    x: i32::from(m.x),
                    y: i32::from(m.y),
                    width: u32::from(m.width),
                    height: u32::from(m.height),
                };
                Ok((display, m.primary))
            })
            .collect()
    }
}

/// The monitor under the pointer, else the primary, else the first.
pub fn pick_active(monitors: Vec<(Display, bool)>, pointer: Option<(i32, i32)>) -> Option<Display> {
    if let Some((x, y)) = pointer {
        if let Some((display, _)) = monitors.iter().find(|(d, _)| d.contains(x, y)) {
            return Some(display.clone());
        }
    }
    let primary = monitors.iter().position(|(_, primary)| *primary).unwrap_or(0);
    monitors.into_iter().nth(primary).map(|(display, _)| display)
}

impl<C: Connection + Send + Sync> DisplayProvider for X11Displays<C> {
    type Error = X11Error;

    fn active_display(&self) -> Result<Display, X11Error> {
        let monitors = self.monitors()?;
        let pointer = self
            .ewmh
            .connection()
            .query_pointer(self.ewmh.root())?
            .reply()
            .ok()
            .map(|p| (i32::from(p.root_x), i32::from(p.root_y)));
        pick_active(monitors, pointer).ok_or(X11Error::NoDisplays)
    }

    fn displays(&self) -> Result<Vec<Display>, X11Error> {
        Ok(self.monitors()?.into_iter().map(|(d, _)| d).collect())
    }
}
