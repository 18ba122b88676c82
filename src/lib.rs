//! **termtile**: control plane of a terminal tiling daemon for X11.
//!
//! A long-running daemon owns a Unix socket; short-lived CLI invocations
//! connect, send one JSON request line and read one JSON response line.
//! The daemon applies layouts by talking EWMH to the running window
//! manager.
//!
//! # Architecture
//!
//! The crate is organised around the collaborator traits in [`traits`]:
//!
//! * [`traits::Tiler`]: owns the active layout and performs tilings.
//! * [`traits::DisplayProvider`]: reports monitor geometry.
//! * [`traits::ConfigStore`]: loads and persists the config file.
//! * [`traits::WindowSystem`]: desktop-level window operations.
//!
//! [`ipc::server::Server`] depends only on the first three, so it can be
//! driven by mocks in tests.  Concrete implementations live in [`tiling`]
//! (the default tiler), [`x11`] (EWMH and RandR) and [`config`] (JSON
//! file store).

pub mod config;
pub mod ipc;
pub mod tiling;
pub mod traits;
pub mod x11;
