//! machsight - desktop client for a machine-monitoring backend
//!
//! Brings up (or attaches to) the monitoring backend, then drives the
//! presenter from a line-oriented console: select machines, refresh
//! telemetry, chat with the backend's assistant, run anomaly analysis.

mod console;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use machsight_core::{
    ApiClient, BackendCommand, BackendSupervisor, Config, DataModel, MainView, Presenter, Startup,
    SupervisorEvent, Timings,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::console::ConsoleView;

#[derive(Parser)]
#[command(name = "machsight", version, about = "Machine monitoring client")]
struct Cli {
    /// Path to a config file (defaults to the XDG location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the backend base URL
    #[arg(long)]
    server_url: Option<String>,

    /// Never spawn a local backend, even if none is reachable
    #[arg(long)]
    no_spawn: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(url) = cli.server_url {
        config.server.base_url = url;
    }

    // Logging goes to the state-dir file; stdout belongs to the console view.
    let _log_guard =
        machsight_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("machsight starting up");

    // Single-threaded event loop: presenter, model, and view are all
    // loop-local; only the supervisor's child I/O runs elsewhere.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let spawn_allowed = config.backend.autostart && !cli.no_spawn;
    runtime.block_on(run(config, spawn_allowed))
}

async fn run(config: Config, spawn_allowed: bool) -> Result<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let model = Rc::new(DataModel::new());
            let client =
                Rc::new(ApiClient::new(&config.server.base_url).context("failed to create API client")?);
            let presenter = Presenter::new(model, client);

            let view: Rc<ConsoleView> = Rc::new(ConsoleView::default());
            presenter.attach_view(view.clone());

            presenter.set_refresh_interval(config.refresh.interval_secs);
            if config.refresh.auto_refresh {
                presenter.set_auto_refresh(true);
            }

            // Bring the backend up before the first load, mirroring the
            // ready → initialize → connect sequence.
            let mut supervisor = if spawn_allowed {
                let command = BackendCommand::from_config(&config.backend)?;
                let mut supervisor =
                    BackendSupervisor::new(&config.server.base_url, command, Timings::default())?;
                forward_supervisor_events(&mut supervisor, view.clone());

                match supervisor.ensure_running().await {
                    Ok(Startup::AlreadyRunning) | Ok(Startup::Spawned { .. }) => {
                        presenter.initialize().await;
                        presenter.on_connect_clicked(&config.server.base_url).await;
                    }
                    Err(e) => {
                        // Fatal for this attempt; the user can `connect` manually.
                        view.show_error(&e.to_string());
                    }
                }
                Some(supervisor)
            } else {
                presenter.initialize().await;
                None
            };

            command_loop(&presenter).await?;

            if let Some(supervisor) = supervisor.as_mut() {
                view.show_info("stopping backend...");
                supervisor.shutdown().await;
            }

            tracing::info!("machsight shutting down");
            Ok(())
        })
        .await
}

/// Print supervisor progress through the view.
fn forward_supervisor_events(supervisor: &mut BackendSupervisor, view: Rc<ConsoleView>) {
    let mut events = supervisor.subscribe();
    tokio::task::spawn_local(async move {
        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::PreChecking => view.show_info("checking for a running backend..."),
                SupervisorEvent::AlreadyRunning => view.show_info("backend already running"),
                SupervisorEvent::Spawned { pid } => {
                    view.show_info(&format!(
                        "backend started (pid {})",
                        pid.map_or_else(|| "?".to_string(), |p| p.to_string())
                    ));
                }
                SupervisorEvent::WaitingForBackend { elapsed_secs, .. } => {
                    view.show_info(&format!("waiting for backend... ({}s elapsed)", elapsed_secs));
                }
                SupervisorEvent::Ready { elapsed_secs } => {
                    view.show_info(&format!("backend ready after {} seconds", elapsed_secs));
                }
                SupervisorEvent::SpawnFailed(_)
                | SupervisorEvent::TimedOut { .. }
                | SupervisorEvent::Stopped => {}
            }
        }
    });
}

/// Read commands from stdin and dispatch them to the presenter until
/// `quit` or EOF.
async fn command_loop(presenter: &Rc<Presenter>) -> Result<()> {
    println!("machsight ready - type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((head, tail)) => (head, tail.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => print_help(),
            "refresh" => presenter.on_refresh_clicked().await,
            "select" => match rest.parse::<i64>() {
                Ok(id) => presenter.on_machine_selected(id).await,
                Err(_) => eprintln!("usage: select <machine id>"),
            },
            "chat" => presenter.on_send_chat_message(rest).await,
            "analyze" => presenter.on_analyze_clicked().await,
            "clear" => presenter.on_clear_chat_clicked(),
            "reports" => presenter.on_reports_requested().await,
            "connect" => presenter.on_connect_clicked(rest).await,
            "autorefresh" => match rest {
                "on" => presenter.set_auto_refresh(true),
                "off" => presenter.set_auto_refresh(false),
                _ => eprintln!("usage: autorefresh on|off"),
            },
            "interval" => match rest.parse::<u64>() {
                Ok(secs) => presenter.set_refresh_interval(secs),
                Err(_) => eprintln!("usage: interval <seconds>"),
            },
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {} (try 'help')", other),
        }
    }

    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  refresh              reload machines and selected telemetry");
    println!("  select <id>          select a machine and load its data");
    println!("  chat <message>       ask the assistant (selected machine as context)");
    println!("  analyze              run anomaly analysis for the selected machine");
    println!("  clear                clear the chat transcript");
    println!("  reports              list stored reports");
    println!("  connect <url>        rebind the backend URL and re-check health");
    println!("  autorefresh on|off   toggle periodic refresh");
    println!("  interval <seconds>   change the refresh cadence");
    println!("  quit                 stop the backend (if spawned) and exit");
}
