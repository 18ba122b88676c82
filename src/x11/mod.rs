//! X11 backends.
//!
//! [`ewmh`] talks EWMH to the window manager over a raw connection;
//! [`display`] enumerates monitors through RandR.
//!
//! Nothing outside this module should reference x11rb directly.

pub mod display;
pub mod ewmh;
