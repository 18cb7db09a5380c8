mod app;
mod cli;
mod config;
mod input;
mod k8s;
mod kubectl;
mod model;
mod nav;
mod page;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand, UiEvent};
use clap::Parser;
use cli::CliArgs;
use config::Settings;
use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use k8s::KubeGateway;
use kubectl::ResourceRef;
use model::{NamespaceScope, ResourceKind};
use nav::{PageController, PageView, RefreshCoordinator, RefreshEvent, StatusKind};
use page::{SharedScope, TablePage, TableSource, table_page_factory};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args)?;

    let settings = Settings::load(&args)?;
    if let Some(source) = &settings.source {
        info!(config = %source, "loaded config");
    }

    let gateway = Arc::new(KubeGateway::new().await?);
    let scope: SharedScope = Arc::new(RwLock::new(resolve_namespace_scope(&args, &gateway)));

    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let coordinator = Arc::new(RefreshCoordinator::new(refresh_tx));
    let source: Arc<dyn TableSource> = gateway.clone();
    let (controller, switch_task) = PageController::start(
        settings.root_page.token(),
        table_page_factory(source, scope.clone(), gateway.catalog()),
        coordinator.clone(),
    )?;
    controller.current_page().trigger_refresh();

    let watchers = k8s::start_watchers(gateway.client(), watch_notifier(&controller));

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let mut app = App::new(
        controller,
        scope,
        gateway.catalog(),
        settings,
        ui_tx,
        gateway.cluster().to_string(),
        gateway.context().to_string(),
    );
    match gateway.server_version().await {
        Ok(version) => app.set_server_version(version),
        Err(error) => warn!(error = %compact_error(&error), "server version unavailable"),
    }

    let result = run(&mut app, refresh_rx, ui_rx).await;

    for task in watchers {
        task.abort();
    }
    coordinator.shutdown();
    drop(app);
    switch_task.abort();
    result
}

fn init_tracing(args: &CliArgs) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

fn resolve_namespace_scope(args: &CliArgs, gateway: &KubeGateway) -> NamespaceScope {
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }

    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::from_arg(namespace)
    } else {
        NamespaceScope::Named(gateway.default_namespace().to_string())
    }
}

/// Watch events poke the registered page for their kind. Pages that were
/// never visited have nothing to refresh.
fn watch_notifier(
    controller: &Arc<PageController<TablePage>>,
) -> Arc<dyn Fn(ResourceKind) + Send + Sync> {
    let controller: Weak<PageController<TablePage>> = Arc::downgrade(controller);
    Arc::new(move |kind: ResourceKind| {
        if let Some(page) = controller
            .upgrade()
            .and_then(|controller| controller.page(kind.token()))
        {
            page.trigger_refresh();
        }
    })
}

async fn run(
    app: &mut App,
    refresh_rx: mpsc::UnboundedReceiver<RefreshEvent>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
) -> Result<()> {
    let mut terminal = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, refresh_rx, ui_rx).await;
    let restore_result = restore_terminal(&mut terminal);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<TuiTerminal> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut TuiTerminal) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    mut refresh_rx: mpsc::UnboundedReceiver<RefreshEvent>,
    mut ui_rx: mpsc::UnboundedReceiver<UiEvent>,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(app.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!(action = ?action, "key action");
                            let command = app.apply_action(action);
                            terminal
                                .draw(|frame| ui::render(frame, app))
                                .context("failed to render terminal frame")?;
                            execute_app_command(terminal, app, command).await;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.show_status(format!("terminal event error: {error}"), StatusKind::Error);
                    }
                    None => break,
                }
            }
            Some(event) = refresh_rx.recv() => app.on_refresh_event(event),
            Some(event) = ui_rx.recv() => app.on_ui_event(event),
            _ = ticker.tick() => {
                app.tick();
            }
        }
    }

    Ok(())
}

async fn execute_app_command(terminal: &mut TuiTerminal, app: &mut App, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::LoadDetail { verb, target } => {
            match kubectl::run_capture(&verb.args(&target)).await {
                Ok(body) => app.set_detail(verb, &target, body),
                Err(error) => app.show_status(compact_error(&error), StatusKind::Error),
            }
        }
        AppCommand::FollowLogs { target } => app.start_log_stream(&target),
        AppCommand::Edit { target } => {
            let args = kubectl::edit_args(&target);
            let result = run_suspended(terminal, &args).await;
            finish_mutation(app, &target, "Edited", result);
        }
        AppCommand::Shell { target } => {
            let result = match kubectl::shell_args(&target) {
                Ok(args) => run_suspended(terminal, &args).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                app.show_status(compact_error(&error), StatusKind::Error);
            }
        }
        AppCommand::Delete { target } => {
            let args = kubectl::delete_args(&target);
            let result = kubectl::run_capture(&args).await.map(|_| ());
            finish_mutation(app, &target, "Deleted", result);
        }
    }
}

fn finish_mutation(app: &mut App, target: &ResourceRef, verb: &str, result: Result<()>) {
    match result {
        Ok(()) => {
            info!(target = %target.label(), verb, "resource changed");
            app.show_status(format!("{verb} {}", target.label()), StatusKind::Progress);
            app.trigger_current_refresh();
        }
        Err(error) => app.show_status(compact_error(&error), StatusKind::Error),
    }
}

async fn run_suspended(terminal: &mut TuiTerminal, args: &[String]) -> Result<()> {
    suspend_terminal_for_subprocess(terminal)?;
    let run_result = kubectl::run_interactive(args).await;
    let restore_result = resume_terminal_after_subprocess(terminal);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal resume error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn suspend_terminal_for_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode for subprocess")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen for subprocess")?;
    terminal
        .show_cursor()
        .context("failed to show cursor for subprocess")?;
    Ok(())
}

fn resume_terminal_after_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    enable_raw_mode().context("failed to re-enable raw mode after subprocess")?;
    execute!(terminal.backend_mut(), EnterAlternateScreen)
        .context("failed to re-enter alternate screen after subprocess")?;
    terminal
        .clear()
        .context("failed to clear terminal after subprocess")?;
    Ok(())
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
