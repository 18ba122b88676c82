//! The default [`Tiler`] used by the daemon binary.
//!
//! [`DesktopTiler`] tracks the active layout and decides *which* windows
//! take part in a tiling, and in what order.  Where each window ends up on
//! screen is left to the window manager: a tiling gathers the terminal
//! windows onto the current desktop and activates them so the first in
//! order ends on top.  Every tiling records what it changed so
//! [`undo_current_monitor`](Tiler::undo_current_monitor) can put it back.

use crate::config::SharedConfig;
use crate::traits::{Display, DisplayProvider, Tiler, WindowSystem};
use crate::x11::ewmh::STICKY_DESKTOP;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Undo snapshots kept per daemon.
const HISTORY_LIMIT: usize = 32;

/// Possible errors from the tiler.
#[derive(Debug, thiserror::Error)]
pub enum TilerError {
    #[error("layout not found: {0}")]
    UnknownLayout(String),
    #[error("no active layout and no default layout configured")]
    NoActiveLayout,
    #[error("no terminal windows to tile")]
    NothingToTile,
    #[error("nothing to undo")]
    NothingToUndo,
    /// The window system returned an error.
    #[error("window system error: {0}")]
    WindowSystem(String),
    /// The display provider returned an error.
    #[error("display error: {0}")]
    Display(String),
}

/// What one tiling changed.
#[derive(Debug, Clone)]
struct Snapshot {
    /// Layout to go back to on undo.
    layout: String,
    /// `(window, desktop it was moved away from)`.
    moved: Vec<(u32, i64)>,
}

#[derive(Debug, Default)]
struct TilerState {
    active: String,
    /// Layout that was active before the first layout change since the
    /// last tiling.  Consumed by the next snapshot.
    replaced: Option<String>,
    history: VecDeque<Snapshot>,
    /// Bumped on every layout change; a preview only reverts if nothing
    /// changed the layout after it started.
    generation: u64,
}

struct Inner<W, P> {
    windows: W,
    displays: P,
    config: SharedConfig,
    state: Mutex<TilerState>,
}

/// Tiler that works through EWMH desktop moves and activations.
///
/// Cheap to clone; clones share state.
pub struct DesktopTiler<W, P> {
    inner: Arc<Inner<W, P>>,
}

impl<W, P> Clone for DesktopTiler<W, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W, P> DesktopTiler<W, P>
where
    W: WindowSystem + 'static,
    P: DisplayProvider + 'static,
{
    /// Create a tiler.  The initial active layout is the configured
    /// default.
    pub fn new(windows: W, displays: P, config: SharedConfig) -> Self {
        let active = config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_layout
            .clone();
        Self {
            inner: Arc::new(Inner {
                windows,
                displays,
                config,
                state: Mutex::new(TilerState {
                    active,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Re-check the active layout against the current config, falling back
    /// to the default if it disappeared.  Called after a reload.
    pub fn revalidate(&self) {
        let (exists, default) = {
            let config = self.inner.config.read().unwrap_or_else(PoisonError::into_inner);
            let active = self.inner.active();
            (
                active.is_empty() || config.has_layout(&active),
                config.default_layout.clone(),
            )
        };
        if !exists {
            info!("active layout vanished on reload, switching to {:?}", default);
            let mut state = self.inner.lock();
            state.active = default;
            state.generation += 1;
        }
    }
}

impl<W: WindowSystem, P: DisplayProvider> Inner<W, P> {
    fn lock(&self) -> std::sync::MutexGuard<'_, TilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> String {
        self.lock().active.clone()
    }

    fn ws<T>(&self, result: Result<T, W::Error>) -> Result<T, TilerError> {
        result.map_err(|e| TilerError::WindowSystem(e.to_string()))
    }

    fn check_layout(&self, name: &str) -> Result<(), TilerError> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        if config.has_layout(name) {
            Ok(())
        } else {
            Err(TilerError::UnknownLayout(name.to_string()))
        }
    }

    fn set_active(&self, name: &str) -> u64 {
        let mut state = self.lock();
        if state.active != name {
            let old = std::mem::replace(&mut state.active, name.to_string());
            state.replaced.get_or_insert(old);
        }
        state.generation += 1;
        state.generation
    }

    /// Record a tiling.  The snapshot restores the layout that was active
    /// before any layout change since the previous tiling.
    fn push_snapshot(&self, moved: Vec<(u32, i64)>) {
        let mut state = self.lock();
        let layout = match state.replaced.take() {
            Some(layout) => layout,
            None => state.active.clone(),
        };
        state.history.push_back(Snapshot { layout, moved });
        if state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
    }

    /// Where the centre of `window` lies.
    fn window_centre(&self, window: u32) -> Result<(i32, i32), W::Error> {
        let (x, y) = self.windows.window_origin(window)?;
        let (width, height) = self.windows.window_size(window)?;
        let half = |n: u32| i32::try_from(n / 2).unwrap_or(i32::MAX);
        Ok((x.saturating_add(half(width)), y.saturating_add(half(height))))
    }

    /// Terminal windows on the current desktop whose centre lies on
    /// `display`, in client-list order.
    fn terminal_windows(&self, display: &Display) -> Result<Vec<u32>, TilerError> {
        let classes = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .terminal_classes
            .clone();
        let desktop = self.ws(self.windows.current_desktop())?;
        let clients = self.ws(self.windows.client_list())?;

        Ok(clients
            .into_iter()
            .filter(|&w| match self.windows.window_desktop(w) {
                Ok(d) => d == desktop || d == STICKY_DESKTOP,
                Err(e) => {
                    debug!("skipping 0x{:x}: {}", w, e);
                    false
                }
            })
            .filter(|&w| {
                self.windows
                    .window_class(w)
                    .map(|names| names.iter().any(|n| classes.contains(n)))
                    .unwrap_or(false)
            })
            .filter(|&w| {
                self.window_centre(w)
                    .map(|(x, y)| display.contains(x, y))
                    .unwrap_or(false)
            })
            .collect())
    }

    fn tile_with_order(&self, order: &[u32]) -> Result<(), TilerError> {
        if order.is_empty() {
            return Err(TilerError::NothingToTile);
        }
        let layout = self.active();
        let layout = if layout.is_empty() {
            self.config
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .default_layout
                .clone()
        } else {
            layout
        };
        if layout.is_empty() {
            return Err(TilerError::NoActiveLayout);
        }

        let desktop = self.ws(self.windows.current_desktop())?;
        let mut moved = Vec::new();
        let result = self.gather_and_raise(order, desktop, &mut moved);
        // Record even a partial tiling so undo can bring moved windows back.
        if result.is_ok() || !moved.is_empty() {
            self.push_snapshot(moved);
        }
        result?;
        info!("tiled {} window(s) with layout {}", order.len(), layout);
        Ok(())
    }

    /// Move `order` onto `desktop`, then activate it last-to-first so the
    /// first window ends up on top.  Every successful move is appended to
    /// `moved`.
    fn gather_and_raise(
        &self,
        order: &[u32],
        desktop: i64,
        moved: &mut Vec<(u32, i64)>,
    ) -> Result<(), TilerError> {
        for &window in order {
            let before = self.windows.window_desktop(window).unwrap_or(desktop);
            if before != desktop && before != STICKY_DESKTOP {
                self.ws(self.windows.move_window_to_desktop(window, desktop))?;
                moved.push((window, before));
            }
        }
        for &window in order.iter().rev() {
            self.ws(self.windows.activate_window(window))?;
        }
        Ok(())
    }

    fn tile_current_monitor(&self) -> Result<(), TilerError> {
        let display = self
            .displays
            .active_display()
            .map_err(|e| TilerError::Display(e.to_string()))?;
        let order = self.terminal_windows(&display)?;
        self.tile_with_order(&order)
    }
}

impl<W, P> Tiler for DesktopTiler<W, P>
where
    W: WindowSystem + 'static,
    P: DisplayProvider + 'static,
{
    type Error = TilerError;

    fn active_layout_name(&self) -> String {
        self.inner.active()
    }

    fn set_active_layout(&self, name: &str) -> Result<(), TilerError> {
        self.inner.check_layout(name)?;
        self.inner.set_active(name);
        debug!("active layout is now {}", name);
        Ok(())
    }

    fn tile_current_monitor(&self) -> Result<(), TilerError> {
        self.inner.tile_current_monitor()
    }

    fn tile_with_order(&self, order: &[u32]) -> Result<(), TilerError> {
        self.inner.tile_with_order(order)
    }

    fn preview_layout(&self, name: &str, duration: Duration) -> Result<(), TilerError> {
        self.inner.check_layout(name)?;
        let restore = self.inner.active();
        let generation = self.inner.set_active(name);
        if let Err(e) = self.inner.tile_current_monitor() {
            debug!("preview of {} did not tile: {}", name, e);
        }

        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name("termtile-preview".into())
            .spawn(move || {
                std::thread::sleep(duration);
                {
                    let mut state = inner.lock();
                    if state.generation != generation {
                        debug!("preview superseded, not reverting");
                        return;
                    }
                    state.active = restore;
                    state.generation += 1;
                }
                info!("preview ended");
            })
            .map_err(|e| TilerError::WindowSystem(format!("cannot schedule preview end: {}", e)))?;
        Ok(())
    }

    fn undo_current_monitor(&self) -> Result<(), TilerError> {
        let snapshot = self
            .inner
            .lock()
            .history
            .pop_back()
            .ok_or(TilerError::NothingToUndo)?;
        for (window, before) in snapshot.moved {
            if let Err(e) = self.inner.windows.move_window_to_desktop(window, before) {
                warn!("cannot move 0x{:x} back to desktop {}: {}", window, before, e);
            }
        }
        if !snapshot.layout.is_empty() {
            let mut state = self.inner.lock();
            state.active = snapshot.layout;
            state.replaced = None;
            state.generation += 1;
        }
        Ok(())
    }

    fn terminal_count(&self, display_id: u32) -> usize {
        let display = match self.inner.displays.displays() {
            Ok(displays) => displays.into_iter().find(|d| d.id == display_id),
            Err(e) => {
                debug!("cannot list displays: {}", e);
                None
            }
        };
        display
            .and_then(|d| self.inner.terminal_windows(&d).ok())
            .map_or(0, |windows| windows.len())
    }
}
