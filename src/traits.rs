//! Collaborator traits that decouple the IPC server from the tiling engine,
//! the display backend and the config file.
//!
//! The [`Server`](crate::ipc::server::Server) only depends on these
//! abstractions.  The binary wires in [`DesktopTiler`](crate::tiling::DesktopTiler),
//! [`X11Displays`](crate::x11::display::X11Displays) and
//! [`JsonConfigStore`](crate::config::JsonConfigStore); tests wire in
//! record-keeping mocks.
//!
//! All traits are `Send + Sync` because the server calls them from one
//! thread per connection.  Implementations provide their own interior
//! locking.

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;

/// A physical display (monitor) as reported by the display backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    /// Backend-assigned index, stable for the lifetime of the X session.
    pub id: u32,
    /// Output name (e.g. `"DP-1"`).
    pub name: String,
    /// X position on the virtual screen (pixels).
    pub x: i32,
    /// Y position on the virtual screen (pixels).
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Display {
    /// Whether the point `(x, y)` lies inside this display.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (i64::from(x), i64::from(y));
        let left = i64::from(self.x);
        let top = i64::from(self.y);
        x >= left && x < left + i64::from(self.width) && y >= top && y < top + i64::from(self.height)
    }
}

/// The tiling engine.
///
/// Slot computation and monitor assignment live behind this trait; the
/// daemon only tells it *what* to do.
pub trait Tiler: Send + Sync {
    /// The error type produced by this tiler.
    type Error: std::error::Error + Send + 'static;

    /// Name of the layout currently in effect, or `""` if none.
    fn active_layout_name(&self) -> String;

    /// Make `name` the active layout.  Fails for unknown names.
    fn set_active_layout(&self, name: &str) -> Result<(), Self::Error>;

    /// Tile the current monitor using the tiler's own window ordering.
    fn tile_current_monitor(&self) -> Result<(), Self::Error>;

    /// Tile the current monitor placing windows in exactly this order.
    fn tile_with_order(&self, order: &[u32]) -> Result<(), Self::Error>;

    /// Temporarily apply `name` for `duration`, then revert.
    fn preview_layout(&self, name: &str, duration: Duration) -> Result<(), Self::Error>;

    /// Revert the most recent tiling of the current monitor.
    fn undo_current_monitor(&self) -> Result<(), Self::Error>;

    /// Number of terminal windows on the display with id `display_id`.
    fn terminal_count(&self, display_id: u32) -> usize;
}

/// Source of display geometry.
pub trait DisplayProvider: Send + Sync {
    /// The error type produced by this provider.
    type Error: std::error::Error + Send + 'static;

    /// The display the user is currently working on.
    fn active_display(&self) -> Result<Display, Self::Error>;

    /// Every connected display.
    fn displays(&self) -> Result<Vec<Display>, Self::Error>;
}

/// Desktop-level window operations the default tiler needs.
///
/// Implemented by [`Ewmh`](crate::x11::ewmh::Ewmh) on a live X connection.
/// Window ids are X11 window XIDs; desktop `-1` means sticky.
pub trait WindowSystem: Send + Sync {
    /// The error type produced by this window system.
    type Error: std::error::Error + Send + 'static;

    /// Desktop currently shown.
    fn current_desktop(&self) -> Result<i64, Self::Error>;

    /// Managed windows in window-manager order.
    fn client_list(&self) -> Result<Vec<u32>, Self::Error>;

    /// Desktop `window` lives on.
    fn window_desktop(&self, window: u32) -> Result<i64, Self::Error>;

    /// Instance and class names of `window`.
    fn window_class(&self, window: u32) -> Result<Vec<String>, Self::Error>;

    /// Top-left corner of `window` on the virtual screen.
    fn window_origin(&self, window: u32) -> Result<(i32, i32), Self::Error>;

    /// Width and height of `window`.
    fn window_size(&self, window: u32) -> Result<(u32, u32), Self::Error>;

    fn move_window_to_desktop(&self, window: u32, desktop: i64) -> Result<(), Self::Error>;

    /// Focus and raise `window`.
    fn activate_window(&self, window: u32) -> Result<(), Self::Error>;
}

impl<W: WindowSystem + ?Sized> WindowSystem for Arc<W> {
    type Error = W::Error;

    fn current_desktop(&self) -> Result<i64, Self::Error> {
        (**self).current_desktop()
    }

    fn client_list(&self) -> Result<Vec<u32>, Self::Error> {
        (**self).client_list()
    }

    fn window_desktop(&self, window: u32) -> Result<i64, Self::Error> {
        (**self).window_desktop(window)
    }

    fn window_class(&self, window: u32) -> Result<Vec<String>, Self::Error> {
        (**self).window_class(window)
    }

    fn window_origin(&self, window: u32) -> Result<(i32, i32), Self::Error> {
        (**self).window_origin(window)
    }

    fn window_size(&self, window: u32) -> Result<(u32, u32), Self::Error> {
        (**self).window_size(window)
    }

    fn move_window_to_desktop(&self, window: u32, desktop: i64) -> Result<(), Self::Error> {
        (**self).move_window_to_desktop(window, desktop)
    }

    fn activate_window(&self, window: u32) -> Result<(), Self::Error> {
        (**self).activate_window(window)
    }
}

/// Persistence for [`Config`].
pub trait ConfigStore: Send + Sync {
    /// The error type produced by this store.
    type Error: std::error::Error + Send + 'static;

    /// Read a complete config.
    fn load(&self) -> Result<Config, Self::Error>;

    /// Persist `config`.
    fn save(&self, config: &Config) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> Display {
        Display {
            id: 0,
            name: "DP-1".into(),
            x: 1920,
            y: 0,
            width: 2560,
            height: 1440,
        }
    }

    #[test]
    fn contains_inside_point() {
        assert!(display().contains(1920, 0));
        assert!(display().contains(3000, 700));
    }

    #[test]
    fn contains_excludes_far_edges() {
        assert!(!display().contains(1919, 10));
        assert!(!display().contains(1920 + 2560, 10));
        assert!(!display().contains(2000, 1440));
        assert!(!display().contains(2000, -1));
    }
}
