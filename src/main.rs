//! Entry point for **termtile**.
//!
//! `termtile daemon` binds the control socket and serves requests on
//! background threads.  Every other subcommand is a one-shot client of
//! that socket, except the X11 helpers, which talk to the X server
//! directly and work without a daemon.

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use termtile::config::{default_config_path, JsonConfigStore};
use termtile::ipc::client::{Client, ClientError};
use termtile::ipc::paths::{self, RuntimeDirError};
use termtile::ipc::server::Server;
use termtile::tiling::DesktopTiler;
use termtile::traits::ConfigStore;
use termtile::x11::display::X11Displays;
use termtile::x11::ewmh::{standalone, Ewmh, X11Error};

#[derive(Parser)]
#[command(name = "termtile", version, about = "Terminal tiling for X11")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon in the foreground.
    Daemon,
    /// Re-read the config file.
    Reload,
    /// Revert the last tiling of the current monitor.
    Undo,
    /// Show daemon status.
    Status,
    /// List monitors as the daemon sees them.
    Monitors,
    /// List configured layouts.
    Layouts,
    /// Exit successfully if the daemon is answering.
    Ping,
    /// Preview a layout for a few seconds (default layout if NAME is omitted).
    Preview {
        name: Option<String>,
        /// Seconds; 0 uses the daemon's default, values above 60 are capped.
        #[arg(short, long, default_value_t = 0)]
        duration: i64,
    },
    /// Activate a layout.
    Apply {
        name: String,
        /// Tile the current monitor right away.
        #[arg(short, long)]
        tile: bool,
        /// Explicit window order (implies --tile).
        #[arg(long, value_delimiter = ',', value_parser = parse_window_id)]
        order: Vec<u32>,
    },
    /// Change and persist the default layout.
    SetDefault {
        name: String,
        #[arg(short, long)]
        tile: bool,
    },
    /// Print the current desktop.
    Desktop,
    /// Print the number of desktops.
    Desktops,
    /// Print the desktop a window lives on.
    WindowDesktop {
        #[arg(value_parser = parse_window_id)]
        window: u32,
    },
    /// Move a window to a desktop (-1 for all desktops).
    MoveWindow {
        #[arg(value_parser = parse_window_id)]
        window: u32,
        #[arg(allow_hyphen_values = true)]
        desktop: i64,
    },
    /// Activate and raise a window.
    Focus {
        #[arg(value_parser = parse_window_id)]
        window: u32,
    },
    /// Print the id of the first window whose title contains TITLE.
    Find { title: String },
}

/// Parse a window id written in decimal or as `0x`-prefixed hex.
fn parse_window_id(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid window id {:?}: {}", s, e))
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    X11(#[from] X11Error),
    #[error(transparent)]
    RuntimeDir(#[from] RuntimeDirError),
    #[error("{0}")]
    Daemon(String),
}

//  Main

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("termtile: {}", e);
        std::process::exit(1);
    }
}

/// Daemon mode.  Blocks until the process is killed.
fn run_daemon(socket: PathBuf) -> Result<(), String> {
    let store = JsonConfigStore::new(default_config_path());
    let config = store
        .load()
        .map_err(|e| format!("{}: {}", store.path().display(), e))?;
    info!(
        "loaded {} layout(s) from {}",
        config.layouts.len(),
        store.path().display()
    );
    let config = config.into_shared();

    let ewmh = Arc::new(Ewmh::connect().map_err(|e| e.to_string())?);
    let displays = X11Displays::new(ewmh.clone());
    let tiler = DesktopTiler::new(ewmh.clone(), X11Displays::new(ewmh), config.clone());

    let server = Server::bind(&socket, config, tiler.clone(), displays, store)
        .map_err(|e| e.to_string())?;

    if let Some(reloads) = server.take_reload_receiver() {
        let spawned = std::thread::Builder::new()
            .name("termtile-reload".into())
            .spawn(move || {
                for () in reloads {
                    tiler.revalidate();
                }
            });
        if let Err(e) = spawned {
            warn!("cannot spawn reload watcher: {}", e);
        }
    }

    info!("termtile daemon running");
    server.run();
    Ok(())
}

/// A client for the daemon socket of the current user.
fn client() -> Result<Client, CliError> {
    Ok(Client::new(paths::socket_path()?))
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Daemon => run_daemon(paths::socket_path()?).map_err(CliError::Daemon)?,
        Command::Reload => {
            client()?.reload()?;
            println!("config reloaded");
        }
        Command::Undo => client()?.undo()?,
        Command::Status => {
            let status = client()?.status()?;
            println!("active layout:  {}", status.active_layout);
            println!("terminals:      {}", status.terminal_count);
            println!("uptime:         {}s", status.uptime_seconds);
        }
        Command::Monitors => {
            for m in client()?.monitors()? {
                println!("{}\t{}\t{}x{}+{}+{}", m.id, m.name, m.width, m.height, m.x, m.y);
            }
        }
        Command::Layouts => {
            let layouts = client()?.list_layouts()?;
            for name in &layouts.layouts {
                let mut marks = Vec::new();
                if *name == layouts.active_layout {
                    marks.push("active");
                }
                if *name == layouts.default_layout {
                    marks.push("default");
                }
                if marks.is_empty() {
                    println!("{}", name);
                } else {
                    println!("{} ({})", name, marks.join(", "));
                }
            }
        }
        Command::Ping => {
            let client = client()?;
            if !client.is_running() {
                return Err(CliError::Daemon(format!(
                    "no daemon answering at {} (is `termtile daemon` running?)",
                    client.path().display()
                )));
            }
            println!("pong");
        }
        Command::Preview { name, duration } => {
            client()?.preview_layout(name.as_deref().unwrap_or(""), duration)?
        }
        Command::Apply { name, tile, order } => {
            let order = (!order.is_empty()).then_some(order.as_slice());
            client()?.apply_layout(&name, tile || order.is_some(), order)?
        }
        Command::SetDefault { name, tile } => client()?.set_default_layout(&name, tile)?,
        Command::Desktop => println!("{}", standalone::current_desktop()?),
        Command::Desktops => println!("{}", standalone::desktop_count()?),
        Command::WindowDesktop { window } => println!("{}", standalone::window_desktop(window)?),
        Command::MoveWindow { window, desktop } => {
            standalone::move_window_to_desktop(window, desktop)?
        }
        Command::Focus { window } => standalone::activate_window(window)?,
        Command::Find { title } => println!("0x{:08x}", standalone::find_window_by_title(&title)?),
    }
    Ok(())
}
