use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::position::PositionMemory;
use super::queue::DrawQueue;
use super::registry::PageRegistry;
use super::{Layer, PageTrack, PageView, Position, RefreshCoordinator};

/// Builds the page for a name on first visit. Called under the navigation
/// lock, so it must not block.
pub type PageFactory<V> = Box<dyn Fn(&str) -> Option<Arc<V>> + Send + Sync>;

struct NavState<V> {
    current: String,
    queue: DrawQueue,
    registry: PageRegistry<V>,
    root_view: Arc<V>,
    positions: PositionMemory,
    menu_shown: bool,
}

pub struct PageController<V> {
    root: String,
    state: Mutex<NavState<V>>,
    factory: PageFactory<V>,
    switches: mpsc::UnboundedSender<String>,
}

impl<V: PageView + 'static> PageController<V> {
    /// Registers the root page, starts the page-switch task and makes the
    /// root page current.
    pub fn start(
        root: impl Into<String>,
        factory: PageFactory<V>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let root = root.into();
        let root_view = factory(&root).with_context(|| format!("no page available for {root}"))?;
        let mut registry = PageRegistry::default();
        registry.insert(&root, root_view.clone());

        let (switches, switch_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            root: root.clone(),
            state: Mutex::new(NavState {
                current: String::new(),
                queue: DrawQueue::new(&root),
                registry,
                root_view,
                positions: PositionMemory::default(),
                menu_shown: false,
            }),
            factory,
            switches,
        });

        let task = tokio::spawn(watch_switches(
            Arc::downgrade(&controller),
            coordinator,
            switch_rx,
        ));
        controller.navigate(&root);
        info!(page = %root, "page controller started");
        Ok((controller, task))
    }

    pub fn switch_page(&self, name: &str, layer: Layer) -> PageTrack {
        let mut state = self.lock();
        let name = if self.ensure_page(&mut state, name) {
            name.to_string()
        } else {
            warn!(page = name, "no page available, falling back to root");
            self.root.clone()
        };

        let track = PageTrack { name, layer };
        state.menu_shown = false;
        if state.current != track.name {
            debug!(from = %state.current, to = %track.name, "switching page");
            state.current = track.name.clone();
            state.queue.settle_last();
            state.queue.enqueue(track.clone());
            self.notify(&track.name);
        } else {
            state.queue.replace_last(track.clone());
        }
        track
    }

    pub fn navigate(&self, name: &str) -> PageTrack {
        self.switch_page(name, Layer::Table)
    }

    /// Undoes one switch. An exhausted history always resolves to root.
    pub fn last_page(&self) -> PageTrack {
        let mut state = self.lock();
        state.menu_shown = false;
        if state.queue.is_empty() {
            debug!("history exhausted, staying on root");
        }
        state.queue.dequeue();
        let mut track = state.queue.last().clone();
        if !self.ensure_page(&mut state, &track.name) {
            warn!(page = %track.name, "history entry has no page, falling back to root");
            track = PageTrack::table(self.root.clone());
            state.queue.replace_last(track.clone());
        }

        if state.current != track.name {
            debug!(from = %state.current, to = %track.name, "navigating back");
            state.current = track.name.clone();
            self.notify(&track.name);
        }
        track
    }

    pub fn show_menu(&self) -> bool {
        let mut state = self.lock();
        if state.menu_shown {
            return false;
        }

        state.menu_shown = true;
        let name = state.current.clone();
        state.queue.replace_last(PageTrack {
            name,
            layer: Layer::Menu,
        });
        true
    }

    pub fn hide_menu(&self) -> bool {
        let mut state = self.lock();
        if !state.menu_shown {
            return false;
        }

        state.menu_shown = false;
        if state.queue.last().layer == Layer::Menu {
            let name = state.current.clone();
            state.queue.replace_last(PageTrack::table(name));
        }
        true
    }

    pub fn menu_shown(&self) -> bool {
        self.lock().menu_shown
    }

    pub fn dismiss_overlay(&self) -> bool {
        let mut state = self.lock();
        if !state.queue.last().layer.is_overlay() {
            return false;
        }

        state.menu_shown = false;
        let name = state.current.clone();
        state.queue.replace_last(PageTrack::table(name));
        true
    }

    /// Falls back to the root page when the current one is not registered.
    pub fn current_page(&self) -> Arc<V> {
        let state = self.lock();
        state
            .registry
            .get(&state.current)
            .unwrap_or_else(|| state.root_view.clone())
    }

    pub fn current_name(&self) -> String {
        self.lock().current.clone()
    }

    pub fn top(&self) -> PageTrack {
        self.lock().queue.last().clone()
    }

    pub fn page(&self, name: &str) -> Option<Arc<V>> {
        self.lock().registry.get(name)
    }

    pub fn history_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn record_position(&self, page: &str, position: Position) {
        self.lock().positions.record(page, position);
    }

    #[cfg(test)]
    pub fn lookup_position(&self, page: &str) -> Option<Position> {
        self.lock().positions.lookup(page)
    }

    /// Tears every page down, rebuilds the current one and re-attaches its
    /// refresh loop. History entries are rebuilt lazily on the way back.
    pub fn reload_pages(&self) {
        let mut state = self.lock();
        let dropped = state.registry.clear();
        if let Some(root_view) = (self.factory)(&self.root) {
            if let Some(position) = state.positions.lookup(&self.root) {
                root_view.restore_position(position);
            }
            state.root_view = root_view;
        }
        let root_view = state.root_view.clone();
        state.registry.insert(&self.root, root_view);

        let current = state.current.clone();
        if !self.ensure_page(&mut state, &current) {
            state.current = self.root.clone();
            state.queue.replace_last(PageTrack::table(self.root.clone()));
        }
        info!(dropped, page = %state.current, "pages reloaded");
        self.notify(&state.current);
    }

    fn ensure_page(&self, state: &mut NavState<V>, name: &str) -> bool {
        let Some((view, created)) = state
            .registry
            .get_or_create(name, |name| (self.factory)(name))
        else {
            return false;
        };
        if created {
            if let Some(position) = state.positions.lookup(name) {
                view.restore_position(position);
            }
            debug!(page = name, "page created");
        }
        true
    }

    fn notify(&self, page: &str) {
        if self.switches.send(page.to_string()).is_err() {
            debug!(page, "page switch watcher is gone");
        }
    }

    fn lock(&self) -> MutexGuard<'_, NavState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn watch_switches<V: PageView + 'static>(
    controller: Weak<PageController<V>>,
    coordinator: Arc<RefreshCoordinator>,
    mut switches: mpsc::UnboundedReceiver<String>,
) {
    while let Some(page) = switches.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        if controller.current_name() != page {
            debug!(page = %page, "skipping stale page switch");
            continue;
        }
        coordinator.activate(controller.current_page());
    }
    coordinator.shutdown();
}

#[cfg(test)]
mod tests {
    use super::{PageController, PageFactory};
    use crate::nav::fake::{FakeView, wait_until};
    use crate::nav::{Layer, PageView, Position, RefreshCoordinator, RefreshEvent, StatusKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fake_factory() -> PageFactory<FakeView> {
        Box::new(|name: &str| {
            if name == "missing" {
                None
            } else {
                Some(Arc::new(FakeView::new(name)))
            }
        })
    }

    fn start() -> (
        Arc<PageController<FakeView>>,
        Arc<RefreshCoordinator>,
        mpsc::UnboundedReceiver<RefreshEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(RefreshCoordinator::new(tx));
        let (controller, _task) =
            PageController::start("root", fake_factory(), coordinator.clone()).expect("start");
        (controller, coordinator, rx)
    }

    #[tokio::test]
    async fn back_navigation_unwinds_to_root() {
        let (controller, _coordinator, _events) = start();
        assert_eq!(controller.current_name(), "root");

        controller.navigate("pods");
        controller.navigate("deployments");
        assert_eq!(controller.current_name(), "deployments");

        let track = controller.last_page();
        assert_eq!(track.name, "pods");
        assert_eq!(controller.current_name(), "pods");

        let track = controller.last_page();
        assert_eq!(track.name, "root");
        assert_eq!(controller.current_name(), "root");
    }

    #[tokio::test]
    async fn back_past_the_first_entry_stays_on_root() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");

        for _ in 0..5 {
            controller.last_page();
        }
        assert_eq!(controller.current_name(), "root");
        assert_eq!(controller.top().name, "root");
        assert_eq!(controller.history_len(), 0);
    }

    #[tokio::test]
    async fn n_switches_then_n_backs_returns_to_start() {
        let (controller, _coordinator, _events) = start();
        let names = ["pods", "deployments", "services", "nodes", "secrets"];
        for name in names {
            controller.navigate(name);
        }
        for _ in names {
            controller.last_page();
        }
        assert_eq!(controller.current_name(), "root");
    }

    #[tokio::test]
    async fn revisits_are_walked_back_in_order() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");
        controller.navigate("nodes");
        controller.navigate("pods");

        assert_eq!(controller.last_page().name, "nodes");
        assert_eq!(controller.last_page().name, "pods");
        assert_eq!(controller.last_page().name, "root");
    }

    #[tokio::test]
    async fn same_page_switch_does_not_deepen_history_or_restart_loop() {
        let (controller, coordinator, _events) = start();
        controller.navigate("pods");
        wait_until(|| coordinator.active_page().as_deref() == Some("pods")).await;
        let depth = controller.history_len();
        let activations = coordinator.activations();
        let pods = controller.current_page();

        controller.switch_page(
            "pods",
            Layer::Detail {
                title: "pods/web".to_string(),
                body: "kind: Pod".to_string(),
            },
        );
        assert_eq!(controller.history_len(), depth);
        assert!(matches!(controller.top().layer, Layer::Detail { .. }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.activations(), activations);
        assert_eq!(coordinator.live_loops(), 1);

        // A pending signal is still served by the same loop.
        pods.trigger_refresh();
        wait_until(|| pods.refreshes() == 1).await;
        assert_eq!(coordinator.activations(), activations);
        assert_eq!(controller.last_page().name, "root");
    }

    #[tokio::test]
    async fn quick_switches_leave_one_loop_on_the_last_page() {
        let (controller, coordinator, _events) = start();
        controller.navigate("a");
        controller.navigate("b");
        controller.navigate("c");

        wait_until(|| coordinator.active_page().as_deref() == Some("c")).await;
        wait_until(|| coordinator.live_loops() == 1).await;

        let a = controller.page("a").expect("a registered");
        let b = controller.page("b").expect("b registered");
        let c = controller.page("c").expect("c registered");
        a.trigger_refresh();
        b.trigger_refresh();
        c.trigger_refresh();
        wait_until(|| c.refreshes() == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(a.refreshes(), 0);
        assert_eq!(b.refreshes(), 0);
    }

    #[tokio::test]
    async fn back_navigation_moves_the_refresh_loop() {
        let (controller, coordinator, _events) = start();
        controller.navigate("pods");
        controller.navigate("nodes");
        wait_until(|| coordinator.active_page().as_deref() == Some("nodes")).await;

        controller.last_page();
        wait_until(|| coordinator.active_page().as_deref() == Some("pods")).await;
        wait_until(|| coordinator.live_loops() == 1).await;
    }

    #[tokio::test]
    async fn pages_are_reused_across_visits() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");
        let first = controller.current_page();
        controller.navigate("nodes");
        controller.navigate("pods");

        assert!(Arc::ptr_eq(&first, &controller.current_page()));
    }

    #[tokio::test]
    async fn unknown_page_falls_back_to_root() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");

        let track = controller.navigate("missing");
        assert_eq!(track.name, "root");
        assert_eq!(controller.current_page().name(), "root");
        assert!(controller.page("missing").is_none());
    }

    #[tokio::test]
    async fn menu_overlay_is_idempotent_and_keeps_history() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");
        let depth = controller.history_len();

        assert!(controller.show_menu());
        assert!(!controller.show_menu());
        assert!(controller.menu_shown());
        assert_eq!(controller.top().layer, Layer::Menu);
        assert_eq!(controller.history_len(), depth);

        assert!(controller.hide_menu());
        assert!(!controller.hide_menu());
        assert_eq!(controller.top().layer, Layer::Table);
    }

    #[tokio::test]
    async fn switching_away_closes_the_menu() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");
        controller.show_menu();
        controller.navigate("nodes");

        assert!(!controller.menu_shown());
        assert_eq!(controller.last_page().layer, Layer::Table);
        assert!(controller.show_menu());
    }

    #[tokio::test]
    async fn dismiss_overlay_restores_table_layer() {
        let (controller, _coordinator, _events) = start();
        controller.navigate("pods");
        assert!(!controller.dismiss_overlay());

        controller.switch_page(
            "pods",
            Layer::Status {
                message: "deleting".to_string(),
                kind: StatusKind::Progress,
            },
        );
        assert!(controller.dismiss_overlay());
        assert_eq!(controller.top().layer, Layer::Table);
        assert_eq!(controller.top().name, "pods");
    }

    #[tokio::test]
    async fn position_is_restored_when_page_is_recreated() {
        let (controller, coordinator, _events) = start();
        controller.navigate("pods");
        controller.record_position("pods", Position::new(3, 0));
        controller.navigate("nodes");

        controller.reload_pages();
        assert_eq!(controller.current_name(), "nodes");
        controller.navigate("pods");

        let pods = controller.current_page();
        assert_eq!(pods.restored(), Some(Position::new(3, 0)));
        assert_eq!(controller.lookup_position("pods"), Some(Position::new(3, 0)));
        wait_until(|| coordinator.active_page().as_deref() == Some("pods")).await;
    }

    #[tokio::test]
    async fn reload_attaches_loop_to_new_instance() {
        let (controller, coordinator, _events) = start();
        controller.navigate("pods");
        let old = controller.current_page();
        wait_until(|| coordinator.active_page().as_deref() == Some("pods")).await;

        controller.reload_pages();
        let new = controller.current_page();
        assert!(!Arc::ptr_eq(&old, &new));

        wait_until(|| coordinator.live_loops() == 1).await;
        new.trigger_refresh();
        wait_until(|| new.refreshes() == 1).await;
        old.trigger_refresh();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(old.refreshes(), 0);
    }

    #[tokio::test]
    async fn concurrent_switches_serialize() {
        let (controller, coordinator, _events) = start();
        let mut tasks = Vec::new();
        for index in 0..8 {
            let controller = controller.clone();
            tasks.push(tokio::spawn(async move {
                controller.navigate(&format!("page-{index}"));
            }));
        }
        for task in tasks {
            task.await.expect("switch task");
        }

        assert_eq!(controller.history_len(), 9);
        let current = controller.current_name();
        assert_eq!(controller.top().name, current);
        wait_until(|| coordinator.active_page().as_deref() == Some(current.as_str())).await;
        wait_until(|| coordinator.live_loops() == 1).await;
    }
}
