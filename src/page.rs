use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{Context, Result};
use futures::future::BoxFuture;

use crate::model::{KindCatalog, NamespaceScope, PageKind, RowData, TableData};
use crate::nav::{PageFactory, PageView, Position, RefreshChannel};

pub type SharedScope = Arc<RwLock<NamespaceScope>>;

/// Supplies rows and columns for a page.
pub trait TableSource: Send + Sync {
    fn fetch_table<'a>(
        &'a self,
        kind: &'a PageKind,
        scope: &'a NamespaceScope,
    ) -> BoxFuture<'a, Result<TableData>>;
}

pub struct TablePage {
    name: String,
    kind: PageKind,
    scope: NamespaceScope,
    source: Arc<dyn TableSource>,
    table: Mutex<TableData>,
    signals: RefreshChannel,
}

impl TablePage {
    pub fn new(kind: PageKind, scope: NamespaceScope, source: Arc<dyn TableSource>) -> Self {
        Self {
            name: kind.token(),
            kind,
            scope,
            source,
            table: Mutex::new(TableData::default()),
            signals: RefreshChannel::default(),
        }
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    #[cfg(test)]
    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn with_table<R>(&self, read: impl FnOnce(&TableData) -> R) -> R {
        read(&*self.lock())
    }

    pub fn selected_row(&self) -> Option<RowData> {
        self.lock().selected_row().cloned()
    }

    pub fn position(&self) -> Position {
        let table = self.lock();
        Position::new(table.selected, table.selected_column)
    }

    pub fn move_selection(&self, delta: isize) -> Position {
        self.lock().move_selection(delta);
        self.position()
    }

    pub fn move_column(&self, delta: isize) -> Position {
        self.lock().move_column(delta);
        self.position()
    }

    pub fn select_first(&self) -> Position {
        self.lock().selected = 0;
        self.position()
    }

    pub fn select_last(&self) -> Position {
        self.lock().select_last();
        self.position()
    }

    pub fn set_filter(&self, filter: &str) {
        self.lock().set_filter(filter.trim());
    }

    fn lock(&self) -> MutexGuard<'_, TableData> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PageView for TablePage {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &RefreshChannel {
        &self.signals
    }

    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Stale rows stay on screen when the fetch fails.
            let fresh = self
                .source
                .fetch_table(&self.kind, &self.scope)
                .await
                .with_context(|| format!("failed to refresh {}", self.kind.title()))?;
            self.lock().absorb(fresh);
            Ok(())
        })
    }

    fn restore_position(&self, position: Position) {
        let mut table = self.lock();
        table.selected = position.row;
        table.selected_column = position.column;
    }
}

/// Registry keys are canonical page names only; aliases are resolved before
/// navigating.
pub fn table_page_factory(
    source: Arc<dyn TableSource>,
    scope: SharedScope,
    catalog: Arc<KindCatalog>,
) -> PageFactory<TablePage> {
    Box::new(move |name: &str| {
        let kind = catalog.resolve(name)?;
        let scope = scope.read().unwrap_or_else(PoisonError::into_inner).clone();
        Some(Arc::new(TablePage::new(kind, scope, source.clone())))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{TablePage, TableSource, table_page_factory};
    use crate::model::{
        CustomKind, KindCatalog, NamespaceScope, PageKind, ResourceKind, RowData, TableData,
    };
    use crate::nav::{PageView, Position};
    use anyhow::Result;
    use chrono::Local;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, RwLock};

    pub(crate) fn certificates() -> CustomKind {
        CustomKind {
            group: "cert-manager.io".to_string(),
            version: "v1".to_string(),
            kind: "Certificate".to_string(),
            plural: "certificates".to_string(),
            namespaced: true,
        }
    }

    pub(crate) fn apps_deployments() -> CustomKind {
        CustomKind {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            plural: "deployments".to_string(),
            namespaced: true,
        }
    }

    /// Five rows per page named `<page>-<i>`; the discovery page lists the
    /// certificates and apps deployments kinds.
    #[derive(Default)]
    pub(crate) struct StaticSource {
        pub fail: AtomicBool,
    }

    impl TableSource for StaticSource {
        fn fetch_table<'a>(
            &'a self,
            kind: &'a PageKind,
            scope: &'a NamespaceScope,
        ) -> BoxFuture<'a, Result<TableData>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    anyhow::bail!("connection refused");
                }
                let rows: Vec<RowData> = match kind {
                    PageKind::ApiResources => [certificates(), apps_deployments()]
                        .iter()
                        .map(|custom| RowData {
                            name: custom.token(),
                            namespace: None,
                            columns: vec![custom.plural.clone(), custom.api_version()],
                        })
                        .collect(),
                    PageKind::Resource(_) | PageKind::Custom(_) => (0..5)
                        .map(|index| {
                            let name = format!("{}-{index}", kind.token());
                            RowData {
                                name: name.clone(),
                                namespace: Some(scope.to_string()),
                                columns: vec![name, scope.to_string()],
                            }
                        })
                        .collect(),
                };
                let mut table = TableData::default();
                table.set_rows(
                    vec!["Name".to_string(), "Namespace".to_string()],
                    rows,
                    Local::now(),
                );
                Ok(table)
            })
        }
    }

    fn page(source: Arc<StaticSource>) -> TablePage {
        TablePage::new(
            PageKind::Resource(ResourceKind::Pods),
            NamespaceScope::Named("default".to_string()),
            source,
        )
    }

    #[tokio::test]
    async fn refresh_loads_rows_and_keeps_selection() {
        let page = page(Arc::new(StaticSource::default()));
        page.restore_position(Position::new(3, 0));

        page.refresh().await.expect("refresh");
        assert_eq!(page.with_table(|table| table.rows.len()), 5);
        assert_eq!(page.position(), Position::new(3, 0));
        assert_eq!(
            page.selected_row().map(|row| row.name),
            Some("pods-3".to_string())
        );
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_rows() {
        let source = Arc::new(StaticSource::default());
        let page = page(source.clone());
        page.refresh().await.expect("refresh");

        source.fail.store(true, Ordering::SeqCst);
        let error = page.refresh().await.expect_err("refresh should fail");
        assert!(format!("{error:#}").contains("failed to refresh Pods"));
        assert_eq!(page.with_table(|table| table.rows.len()), 5);
    }

    #[tokio::test]
    async fn selection_moves_within_bounds() {
        let page = page(Arc::new(StaticSource::default()));
        page.refresh().await.expect("refresh");

        assert_eq!(page.move_selection(2), Position::new(2, 0));
        assert_eq!(page.move_selection(10), Position::new(4, 0));
        assert_eq!(page.select_first(), Position::new(0, 0));
        assert_eq!(page.select_last(), Position::new(4, 0));
    }

    #[test]
    fn factory_builds_pages_in_the_shared_scope() {
        let scope = Arc::new(RwLock::new(NamespaceScope::Named("prod".to_string())));
        let factory = table_page_factory(
            Arc::new(StaticSource::default()),
            scope.clone(),
            Arc::new(KindCatalog::default()),
        );

        let page = factory("deployments").expect("page");
        assert_eq!(page.kind(), &PageKind::Resource(ResourceKind::Deployments));
        assert_eq!(page.scope(), &NamespaceScope::Named("prod".to_string()));

        *scope.write().expect("scope lock") = NamespaceScope::All;
        assert_eq!(factory("nodes").expect("page").scope(), &NamespaceScope::All);
        assert!(factory("deploy").is_none());
        assert!(factory("bogus").is_none());
    }

    #[test]
    fn factory_builds_discovered_pages_once_cataloged() {
        let catalog = Arc::new(KindCatalog::default());
        let factory = table_page_factory(
            Arc::new(StaticSource::default()),
            Arc::new(RwLock::new(NamespaceScope::All)),
            catalog.clone(),
        );
        assert!(factory("certificates.cert-manager.io").is_none());
        assert_eq!(
            factory("api-resources").expect("listing").kind(),
            &PageKind::ApiResources
        );

        catalog.replace([certificates()]);
        let page = factory("certificates.cert-manager.io").expect("page");
        assert_eq!(page.name(), "certificates.cert-manager.io");
        assert_eq!(page.kind().title(), "Certificate (cert-manager.io/v1)");
    }
}
