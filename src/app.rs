use crate::config::Settings;
use crate::input::Action;
use crate::kubectl::{self, DetailVerb, LogFeed, LogSink, LogStream, ResourceRef};
use crate::model::{API_RESOURCES, KindCatalog, NamespaceScope, PageKind, ResourceKind};
use crate::nav::{Layer, PageController, PageTrack, PageView, RefreshEvent, StatusKind};
use crate::page::{SharedScope, TablePage};
use anyhow::Result;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const PAGE_STEP: isize = 10;
const MAX_LOG_LINES: usize = 5_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Search,
    Command,
    Confirm,
}

/// Events produced by tasks the app schedules for itself.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UiEvent {
    StatusExpired { ticket: u64 },
    Log { stream: u64, feed: LogFeed },
}

/// Work the main loop performs outside the UI state, usually by running
/// kubectl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    LoadDetail {
        verb: DetailVerb,
        target: ResourceRef,
    },
    FollowLogs {
        target: ResourceRef,
    },
    Edit {
        target: ResourceRef,
    },
    Shell {
        target: ResourceRef,
    },
    Delete {
        target: ResourceRef,
    },
}

pub struct App {
    controller: Arc<PageController<TablePage>>,
    scope: SharedScope,
    catalog: Arc<KindCatalog>,
    settings: Settings,
    ui_events: mpsc::UnboundedSender<UiEvent>,
    mode: InputMode,
    input: String,
    status: String,
    status_ticket: u64,
    status_restore: Option<PageTrack>,
    pending_delete: Option<ResourceRef>,
    detail_scroll: u16,
    log_stream: Option<LogStream>,
    log_stream_id: u64,
    log_lines: Vec<String>,
    log_follow: bool,
    cluster: String,
    context: String,
    server_version: String,
    running: bool,
}

impl App {
    pub fn new(
        controller: Arc<PageController<TablePage>>,
        scope: SharedScope,
        catalog: Arc<KindCatalog>,
        settings: Settings,
        ui_events: mpsc::UnboundedSender<UiEvent>,
        cluster: String,
        context: String,
    ) -> Self {
        Self {
            controller,
            scope,
            catalog,
            settings,
            ui_events,
            mode: InputMode::Normal,
            input: String::new(),
            status: "Ready".to_string(),
            status_ticket: 0,
            status_restore: None,
            pending_delete: None,
            detail_scroll: 0,
            log_stream: None,
            log_stream_id: 0,
            log_lines: Vec::new(),
            log_follow: true,
            cluster,
            context,
            server_version: "unknown".to_string(),
            running: true,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn set_server_version(&mut self, version: impl Into<String>) {
        self.server_version = version.into();
    }

    pub fn namespace_scope(&self) -> NamespaceScope {
        self.scope.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.settings.refresh
    }

    pub fn pages(&self) -> &[ResourceKind] {
        &self.settings.pages
    }

    pub fn detail_scroll(&self) -> u16 {
        self.detail_scroll
    }

    pub fn log_text(&self) -> String {
        self.log_lines.join("\n")
    }

    pub fn log_following(&self) -> bool {
        self.log_follow
    }

    /// False once the followed process has exited or was stopped.
    pub fn log_stream_live(&self) -> bool {
        self.log_stream
            .as_ref()
            .is_some_and(|stream| !stream.is_finished())
    }

    pub fn controller(&self) -> &Arc<PageController<TablePage>> {
        &self.controller
    }

    pub fn current_page(&self) -> Arc<TablePage> {
        self.controller.current_page()
    }

    /// The page and layer to draw.
    pub fn visible(&self) -> (Arc<TablePage>, PageTrack) {
        let track = self.controller.top();
        let page = self
            .controller
            .page(&track.name)
            .unwrap_or_else(|| self.controller.current_page());
        (page, track)
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        let command = self.dispatch(action);
        self.sync_log_stream();
        command
    }

    fn dispatch(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                AppCommand::None
            }
            Action::GoToPage(digit) => {
                let index = if digit == 0 { 9 } else { usize::from(digit) - 1 };
                match self.settings.pages.get(index).copied() {
                    Some(kind) => self.open_page(kind.token()),
                    None => self.status = format!("No page bound to {digit}"),
                }
                AppCommand::None
            }
            Action::ToggleMenu => {
                if self.controller.menu_shown() {
                    self.controller.hide_menu();
                } else {
                    self.controller.show_menu();
                }
                AppCommand::None
            }
            Action::Escape => {
                if matches!(self.controller.top().layer, Layer::Status { .. }) {
                    self.clear_status();
                } else if self.controller.dismiss_overlay() {
                    self.detail_scroll = 0;
                } else {
                    self.go_back();
                }
                AppCommand::None
            }
            Action::Back => {
                self.go_back();
                AppCommand::None
            }
            Action::Refresh => {
                let page = self.current_page();
                if page.trigger_refresh() {
                    self.show_status(
                        format!("Refreshing {}", page.kind().title()),
                        StatusKind::Progress,
                    );
                } else {
                    self.status = format!("Refresh of {} already pending", page.kind().title());
                }
                AppCommand::None
            }
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::PageDown => {
                self.move_selection(PAGE_STEP);
                AppCommand::None
            }
            Action::PageUp => {
                self.move_selection(-PAGE_STEP);
                AppCommand::None
            }
            Action::Left => {
                let page = self.current_page();
                let position = page.move_column(-1);
                self.controller.record_position(page.name(), position);
                AppCommand::None
            }
            Action::Right => {
                let page = self.current_page();
                let position = page.move_column(1);
                self.controller.record_position(page.name(), position);
                AppCommand::None
            }
            Action::Top => {
                if self.scrollable_shown() {
                    self.log_follow = false;
                    self.detail_scroll = 0;
                } else {
                    let page = self.current_page();
                    let position = page.select_first();
                    self.controller.record_position(page.name(), position);
                }
                AppCommand::None
            }
            Action::Bottom => {
                if self.scrollable_shown() {
                    self.log_follow = true;
                    self.detail_scroll = u16::MAX;
                } else {
                    let page = self.current_page();
                    let position = page.select_last();
                    self.controller.record_position(page.name(), position);
                }
                AppCommand::None
            }
            Action::Open => self.open_selected(),
            Action::ShowYaml => self.detail_command(DetailVerb::Yaml),
            Action::Describe => self.detail_command(DetailVerb::Describe),
            Action::Logs => match self.selected_pod() {
                Some(target) => {
                    self.status = format!("Following logs of {}", target.label());
                    AppCommand::FollowLogs { target }
                }
                None => AppCommand::None,
            },
            Action::Edit => match self.selected_target() {
                Some(target) => AppCommand::Edit { target },
                None => AppCommand::None,
            },
            Action::Shell => match self.selected_pod() {
                Some(target) => AppCommand::Shell { target },
                None => AppCommand::None,
            },
            Action::Delete => {
                if let Some(target) = self.selected_target() {
                    let prompt = format!("Delete {}?", target.label());
                    let name = self.controller.current_name();
                    self.controller.switch_page(&name, Layer::Confirm { prompt });
                    self.pending_delete = Some(target);
                    self.mode = InputMode::Confirm;
                }
                AppCommand::None
            }
            Action::ConfirmYes => {
                self.mode = InputMode::Normal;
                self.controller.dismiss_overlay();
                match self.pending_delete.take() {
                    Some(target) => AppCommand::Delete { target },
                    None => AppCommand::None,
                }
            }
            Action::ConfirmNo => {
                self.mode = InputMode::Normal;
                self.controller.dismiss_overlay();
                if let Some(target) = self.pending_delete.take() {
                    self.status = format!("Kept {}", target.label());
                }
                AppCommand::None
            }
            Action::StartSearch => {
                self.mode = InputMode::Search;
                self.input = self.current_page().with_table(|table| table.filter.clone());
                AppCommand::None
            }
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.input.push(c);
                self.apply_live_filter();
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                self.apply_live_filter();
                AppCommand::None
            }
            Action::CancelInput => {
                if self.mode == InputMode::Search {
                    self.current_page().set_filter("");
                }
                self.mode = InputMode::Normal;
                self.input.clear();
                AppCommand::None
            }
            Action::SubmitInput => {
                let line = std::mem::take(&mut self.input);
                let mode = std::mem::replace(&mut self.mode, InputMode::Normal);
                match mode {
                    InputMode::Search => {
                        self.current_page().set_filter(&line);
                        self.status = if line.trim().is_empty() {
                            "Filter cleared".to_string()
                        } else {
                            format!("Filter: {}", line.trim())
                        };
                    }
                    InputMode::Command => self.run_command(&line),
                    InputMode::Normal | InputMode::Confirm => {}
                }
                AppCommand::None
            }
        }
    }

    /// Shows a transient message over the current page and schedules its
    /// dismissal after the configured delay. A detail or log layer under
    /// the message comes back when it is dismissed.
    pub fn show_status(&mut self, message: impl Into<String>, kind: StatusKind) {
        let message = message.into();
        self.status = message.clone();
        if self.mode == InputMode::Confirm {
            return;
        }

        let top = self.controller.top();
        match top.layer {
            Layer::Status { .. } => {}
            Layer::Detail { .. } | Layer::Logs { .. } => self.status_restore = Some(top),
            Layer::Table | Layer::Menu | Layer::Confirm { .. } => self.status_restore = None,
        }

        let name = self.controller.current_name();
        self.controller.switch_page(&name, Layer::Status { message, kind });
        self.status_ticket += 1;

        let ticket = self.status_ticket;
        let delay = self.settings.status_delay;
        let events = self.ui_events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(UiEvent::StatusExpired { ticket });
        });
    }

    pub fn on_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::StatusExpired { ticket } => {
                if ticket != self.status_ticket {
                    return;
                }
                if matches!(self.controller.top().layer, Layer::Status { .. }) {
                    self.clear_status();
                }
                self.sync_log_stream();
            }
            UiEvent::Log { stream, feed } => {
                if stream != self.log_stream_id || self.log_stream.is_none() {
                    debug!(stream, "dropping output of a retired log stream");
                    return;
                }
                match feed {
                    LogFeed::Line(line) => self.push_log_line(line),
                    LogFeed::Closed(None) => self.push_log_line("[log stream ended]".to_string()),
                    LogFeed::Closed(Some(reason)) => {
                        self.push_log_line(format!("[log stream failed: {reason}]"));
                    }
                }
            }
        }
    }

    pub fn on_refresh_event(&mut self, event: RefreshEvent) {
        match event {
            RefreshEvent::Rendered { page } => debug!(page = %page, "page rendered"),
            RefreshEvent::Failed { page, error } => {
                if page == self.controller.current_name() {
                    self.show_status(error, StatusKind::Error);
                }
            }
        }
    }

    pub fn set_detail(&mut self, verb: DetailVerb, target: &ResourceRef, body: String) {
        let title = format!("{} {}", verb.title(), target.label());
        let name = self.controller.current_name();
        self.status_restore = None;
        self.controller.switch_page(&name, Layer::Detail { title, body });
        self.detail_scroll = 0;
        self.sync_log_stream();
    }

    pub fn set_detail_scroll(&mut self, scroll: u16) {
        self.detail_scroll = scroll;
    }

    pub fn start_log_stream(&mut self, target: &ResourceRef) {
        let args = match kubectl::logs_args(target) {
            Ok(args) => args,
            Err(error) => {
                self.show_status(format!("{error:#}"), StatusKind::Error);
                return;
            }
        };
        self.attach_logs(format!("logs {}", target.label()), |sink| {
            LogStream::follow(&args, sink)
        });
    }

    /// Replaces any running log stream with the one `open` starts and shows
    /// its output in a log layer over the current page.
    pub(crate) fn attach_logs(
        &mut self,
        title: String,
        open: impl FnOnce(LogSink) -> Result<LogStream>,
    ) {
        self.stop_log_stream();
        self.log_stream_id += 1;
        let stream = self.log_stream_id;
        let events = self.ui_events.clone();
        let sink: LogSink = Box::new(move |feed: LogFeed| {
            let _ = events.send(UiEvent::Log { stream, feed });
        });

        match open(sink) {
            Ok(log_stream) => {
                self.log_stream = Some(log_stream);
                self.log_lines.clear();
                self.log_follow = true;
                self.detail_scroll = u16::MAX;
                self.status_restore = None;
                self.status = format!("Following {title}");
                let name = self.controller.current_name();
                self.controller.switch_page(&name, Layer::Logs { title });
            }
            Err(error) => self.show_status(format!("{error:#}"), StatusKind::Error),
        }
    }

    /// Periodic poll of the current page. Pages that are not polled only
    /// refresh on request.
    pub fn tick(&self) -> bool {
        let page = self.current_page();
        page.kind().polled() && page.trigger_refresh()
    }

    pub fn trigger_current_refresh(&self) -> bool {
        self.current_page().trigger_refresh()
    }

    fn open_page(&mut self, name: &str) {
        let track = self.controller.navigate(name);
        self.detail_scroll = 0;
        self.trigger_current_refresh();
        self.status = format!("Viewing {}", track.name);
    }

    fn go_back(&mut self) {
        let before = self.controller.history_len();
        let track = self.controller.last_page();
        self.detail_scroll = 0;
        self.trigger_current_refresh();
        if before <= 1 {
            self.status = format!("Already at {}", track.name);
        } else {
            self.status = format!("Back to {}", track.name);
        }
    }

    fn clear_status(&mut self) {
        let name = self.controller.current_name();
        match self.status_restore.take() {
            Some(track) if track.name == name => {
                self.controller.switch_page(&name, track.layer);
            }
            _ => {
                self.controller.dismiss_overlay();
            }
        }
    }

    fn logs_on_screen(&self) -> bool {
        let top = self.controller.top();
        match top.layer {
            Layer::Logs { .. } => true,
            Layer::Status { .. } => self.status_restore.as_ref().is_some_and(|saved| {
                saved.name == top.name && matches!(saved.layer, Layer::Logs { .. })
            }),
            _ => false,
        }
    }

    fn sync_log_stream(&mut self) {
        if self.log_stream.is_some() && !self.logs_on_screen() {
            self.stop_log_stream();
        }
    }

    fn stop_log_stream(&mut self) {
        if let Some(stream) = self.log_stream.take() {
            stream.stop();
            info!(stream = self.log_stream_id, "log stream closed");
        }
    }

    fn push_log_line(&mut self, line: String) {
        self.log_lines.push(line);
        if self.log_lines.len() > MAX_LOG_LINES {
            let excess = self.log_lines.len() - MAX_LOG_LINES;
            self.log_lines.drain(..excess);
        }
        if self.log_follow {
            self.detail_scroll = u16::MAX;
        }
    }

    fn scrollable_shown(&self) -> bool {
        matches!(
            self.controller.top().layer,
            Layer::Detail { .. } | Layer::Logs { .. }
        )
    }

    fn move_selection(&mut self, delta: isize) {
        if self.scrollable_shown() {
            if delta < 0 {
                self.log_follow = false;
            }
            self.detail_scroll = if delta < 0 {
                self.detail_scroll.saturating_sub(delta.unsigned_abs() as u16)
            } else {
                self.detail_scroll.saturating_add(delta as u16)
            };
            return;
        }

        let page = self.current_page();
        let position = page.move_selection(delta);
        self.controller.record_position(page.name(), position);
    }

    fn apply_live_filter(&mut self) {
        if self.mode == InputMode::Search {
            self.current_page().set_filter(&self.input);
        }
    }

    fn selected_target(&mut self) -> Option<ResourceRef> {
        let page = self.current_page();
        let Some(row) = page.selected_row() else {
            self.show_status("No resource selected", StatusKind::Error);
            return None;
        };
        let target = ResourceRef::from_row(page.kind(), &row);
        if target.is_none() {
            self.show_status(
                format!("{} has no kubectl actions, press Enter to open it", row.name),
                StatusKind::Error,
            );
        }
        target
    }

    fn selected_pod(&mut self) -> Option<ResourceRef> {
        if self.current_page().kind().resource() != Some(ResourceKind::Pods) {
            self.show_status("Only available on the pods page", StatusKind::Error);
            return None;
        }
        self.selected_target()
    }

    fn detail_command(&mut self, verb: DetailVerb) -> AppCommand {
        match self.selected_target() {
            Some(target) => {
                self.status = format!("Loading {} for {}", verb.title(), target.label());
                AppCommand::LoadDetail { verb, target }
            }
            None => AppCommand::None,
        }
    }

    /// Enter drills into a discovered resource from the API resources page
    /// and describes the selection everywhere else.
    fn open_selected(&mut self) -> AppCommand {
        let page = self.current_page();
        if *page.kind() != PageKind::ApiResources {
            return self.detail_command(DetailVerb::Describe);
        }

        let Some(row) = page.selected_row() else {
            self.show_status("No resource selected", StatusKind::Error);
            return AppCommand::None;
        };
        match self.catalog_page(&row.name) {
            Some(name) => self.open_page(&name),
            None => self.show_status(format!("{} cannot be listed", row.name), StatusKind::Error),
        }
        AppCommand::None
    }

    /// Page name for a discovered resource. Built-in kinds open their own
    /// page.
    fn catalog_page(&self, token: &str) -> Option<String> {
        let custom = self.catalog.get(token)?;
        Some(match custom.builtin() {
            Some(kind) => kind.token().to_string(),
            None => custom.token(),
        })
    }

    fn run_command(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return;
        };
        let arg = parts.next();

        match (head, arg) {
            ("q" | "q!" | "quit", _) => self.running = false,
            ("ns" | "namespace", Some(namespace)) => {
                self.set_namespace(NamespaceScope::from_arg(namespace));
            }
            ("api-resources" | "api" | "res", _) => self.open_page(API_RESOURCES),
            _ => {
                let target = match self.settings.resolve_page(head) {
                    Some(kind) => Some(kind.token().to_string()),
                    None => self.catalog_page(&head.to_ascii_lowercase()),
                };
                match target {
                    Some(name) => self.open_page(&name),
                    None => self.show_status(format!("Unknown command: {head}"), StatusKind::Error),
                }
            }
        }
    }

    fn set_namespace(&mut self, scope: NamespaceScope) {
        {
            let mut current = self.scope.write().unwrap_or_else(PoisonError::into_inner);
            if *current == scope {
                self.status = format!("Already in namespace {scope}");
                return;
            }
            *current = scope.clone();
        }

        info!(namespace = %scope, "namespace changed");
        self.controller.reload_pages();
        self.trigger_current_refresh();
        self.status = format!("Namespace: {scope}");
    }
}
