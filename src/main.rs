mod backends;
mod config;
mod connection;
mod engine;
mod keybindings;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::capture::{PacketSource, detect_packet_sources, select_packet_source};
use crate::backends::resolver::{DnsHostnameResolver, HostnameResolver, NullResolver};
use crate::backends::snapshot::{
    ConnectionSource, detect_connection_sources, select_connection_source,
};
use crate::config::Config;
use crate::engine::Engine;
use crate::ui::AppState;

/// connwatch - A TUI connection monitor for Linux
#[derive(Parser, Debug)]
#[command(name = "connwatch")]
#[command(version)]
#[command(about = "Live view of every TCP/UDP connection, its process and its traffic", long_about = None)]
struct Args {
    /// Connection table polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    refresh_ms: Option<u64>,

    /// Display reconciliation interval in milliseconds
    #[arg(long, value_name = "MS")]
    display_ms: Option<u64>,

    /// Show only connections matching this case-insensitive regex
    #[arg(long, value_name = "PATTERN")]
    filter: Option<String>,

    /// Show connections whose owning process is unknown
    #[arg(long)]
    pid_zero: bool,

    /// Don't capture packets (no traffic counters)
    #[arg(long)]
    no_capture: bool,

    /// Don't resolve hostnames
    #[arg(long)]
    no_resolve: bool,

    /// Connection source backend to use
    #[arg(long, value_name = "NAME")]
    source: Option<String>,

    /// Capture on this interface only (repeatable)
    #[arg(long = "interface", value_name = "NAME")]
    interfaces: Vec<String>,

    /// List all available backends and exit
    #[arg(long)]
    list_backends: bool,

    /// Don't save filter/view settings on exit
    #[arg(long)]
    no_save: bool,
}

impl Args {
    /// Command line flags win over the saved configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ms) = self.refresh_ms {
            config.refresh_interval_ms = ms;
        }
        if let Some(ms) = self.display_ms {
            config.display_interval_ms = ms;
        }
        if let Some(pattern) = &self.filter {
            config.filter_enabled = !pattern.is_empty();
            config.connection_filter = pattern.clone();
        }
        if self.pid_zero {
            config.view_pid_zero = true;
        }
        if let Some(source) = &self.source {
            config.preferred_connection_source = Some(source.clone());
        }
        if !self.interfaces.is_empty() {
            config.capture_interfaces = Some(self.interfaces.clone());
        }
    }
}

fn print_available_backends() {
    println!("connwatch v{} - Available Backends\n", env!("CARGO_PKG_VERSION"));

    println!("Connection Sources:");
    let sources = detect_connection_sources();
    if sources.is_empty() {
        println!("  (none compiled in)");
    } else {
        for source in sources {
            let status = if source.available {
                "available"
            } else {
                "unavailable"
            };
            println!(
                "  {:20} [priority: {:?}] {}",
                source.name, source.priority, status
            );
        }
    }

    println!();

    println!("Packet Sources:");
    let packet_sources = detect_packet_sources();
    if packet_sources.is_empty() {
        println!("  (none compiled in - traffic counters disabled)");
    } else {
        for source in packet_sources {
            let status = if source.available {
                "available"
            } else {
                "unavailable (needs CAP_NET_RAW or root)"
            };
            println!(
                "  {:20} [priority: {:?}] {}",
                source.name, source.priority, status
            );
        }
    }

    println!();
    println!("Usage:");
    println!("  connwatch [--source <name>] [--interface <name>]... [--filter <regex>]");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    if args.list_backends {
        print_available_backends();
        return Ok(());
    }

    let mut saved_config = Config::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });
    let mut config = saved_config.clone();
    args.apply_overrides(&mut config);

    // Select backends before touching the terminal so errors print normally
    let source: Arc<dyn ConnectionSource> = Arc::from(
        select_connection_source(config.preferred_connection_source.as_deref())
            .context("Cannot enumerate connections on this system")?,
    );
    log::debug!(
        "Connection source {} [priority: {:?}] capabilities: {:?}",
        source.name(),
        source.priority(),
        source.capabilities()
    );

    let packet_source: Option<Arc<dyn PacketSource>> = if args.no_capture {
        log::info!("Packet capture disabled (--no-capture)");
        None
    } else {
        let selected: Option<Arc<dyn PacketSource>> =
            select_packet_source(config.capture_interfaces.clone()).map(Arc::from);
        match &selected {
            Some(packets) => log::debug!(
                "Packet source {} [priority: {:?}] capabilities: {:?}",
                packets.name(),
                packets.priority(),
                packets.capabilities()
            ),
            None => log::warn!("No packet source available, traffic counters disabled"),
        }
        selected
    };

    let resolver: Arc<dyn HostnameResolver> = if args.no_resolve {
        Arc::new(NullResolver)
    } else {
        Arc::new(DnsHostnameResolver::new())
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let engine = Engine::start(
        config.timing(),
        source,
        packet_source,
        resolver,
        config.runtime_settings(),
    );
    let mut app = AppState::new(engine.settings());

    // Run the app
    let res = run_app(&mut terminal, &mut app, &engine).await;

    let settings = engine.settings();
    log::info!("Observed {} packet(s) this session", engine.packets_seen());
    engine.shutdown().await;

    // Save settings changed in the UI (unless --no-save specified)
    if !args.no_save {
        saved_config.store_runtime_settings(&settings);
        if let Err(e) = saved_config.save() {
            log::warn!("Failed to save config: {}", e);
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        log::error!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    engine: &Engine,
) -> Result<()> {
    loop {
        app.update_snapshot(engine.snapshot());

        // Draw UI
        terminal.draw(|f| ui::draw_ui(f, app))?;

        // Handle input with timeout
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // ALWAYS check Ctrl+C first - force quit regardless of modal state
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(());
        }

        // If help is shown, arrows scroll and any other key closes it
        if app.show_help {
            match key.code {
                KeyCode::Up | KeyCode::Char('k') => app.scroll_help_up(),
                KeyCode::Down | KeyCode::Char('j') => app.scroll_help_down(),
                _ => app.show_help = false,
            }
            continue;
        }

        // Filter prompt owns the keyboard while open
        if app.filter_input.is_some() {
            match key.code {
                KeyCode::Esc => app.cancel_filter_edit(),
                KeyCode::Enter => {
                    if let Some(filter) = app.commit_filter_edit() {
                        engine.update_settings(|s| s.filter = filter);
                    }
                }
                KeyCode::Backspace => app.handle_filter_backspace(),
                KeyCode::Char(c) => app.handle_filter_char(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                return Ok(());
            }
            KeyCode::Char('h') | KeyCode::Char('?') => {
                app.reset_help_scroll();
                app.show_help = true;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                app.select_next();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                app.select_previous();
            }
            KeyCode::Char('g') => {
                app.select_first();
            }
            KeyCode::Char('G') => {
                app.select_last();
            }
            KeyCode::Enter => {
                app.status_message = match app.get_selected_connection() {
                    Some(conn) => conn.to_string(),
                    None => "No connection selected".to_string(),
                };
            }
            KeyCode::Char('/') => {
                app.start_filter_edit();
            }
            KeyCode::Char('F') => {
                engine.update_settings(|s| s.filter.enabled = !s.filter.enabled);
                app.settings = engine.settings();
                app.status_message = if app.settings.filter.enabled {
                    "Filter enabled".to_string()
                } else {
                    "Filter disabled".to_string()
                };
            }
            KeyCode::Char('z') => {
                engine.update_settings(|s| s.view_pid_zero = !s.view_pid_zero);
                app.settings = engine.settings();
                app.status_message = if app.settings.view_pid_zero {
                    "Showing connections without a known process".to_string()
                } else {
                    "Hiding connections without a known process".to_string()
                };
            }
            _ => {}
        }
    }
}
