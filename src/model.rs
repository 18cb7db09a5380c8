use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};

/// Page name of the discovered API resources listing.
pub const API_RESOURCES: &str = "api-resources";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Pods,
    Deployments,
    StatefulSets,
    DaemonSets,
    Jobs,
    Services,
    Ingresses,
    ConfigMaps,
    Secrets,
    Nodes,
    Namespaces,
}

impl ResourceKind {
    pub const ALL: [Self; 11] = [
        Self::Pods,
        Self::Deployments,
        Self::StatefulSets,
        Self::DaemonSets,
        Self::Jobs,
        Self::Services,
        Self::Ingresses,
        Self::ConfigMaps,
        Self::Secrets,
        Self::Nodes,
        Self::Namespaces,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Pods => "Pods",
            Self::Deployments => "Deployments",
            Self::StatefulSets => "StatefulSets",
            Self::DaemonSets => "DaemonSets",
            Self::Jobs => "Jobs",
            Self::Services => "Services",
            Self::Ingresses => "Ingresses",
            Self::ConfigMaps => "ConfigMaps",
            Self::Secrets => "Secrets",
            Self::Nodes => "Nodes",
            Self::Namespaces => "Namespaces",
        }
    }

    /// Page name, also the resource argument handed to kubectl.
    pub fn token(self) -> &'static str {
        match self {
            Self::Pods => "pods",
            Self::Deployments => "deployments",
            Self::StatefulSets => "statefulsets",
            Self::DaemonSets => "daemonsets",
            Self::Jobs => "jobs",
            Self::Services => "services",
            Self::Ingresses => "ingresses",
            Self::ConfigMaps => "configmaps",
            Self::Secrets => "secrets",
            Self::Nodes => "nodes",
            Self::Namespaces => "namespaces",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Some(Self::Pods),
            "deploy" | "deployment" | "deployments" | "dp" => Some(Self::Deployments),
            "sts" | "statefulset" | "statefulsets" => Some(Self::StatefulSets),
            "ds" | "daemonset" | "daemonsets" | "daemon-set" | "daemon-sets" => {
                Some(Self::DaemonSets)
            }
            "job" | "jobs" => Some(Self::Jobs),
            "svc" | "service" | "services" => Some(Self::Services),
            "ing" | "ingress" | "ingresses" => Some(Self::Ingresses),
            "cm" | "configmap" | "configmaps" | "config-map" | "config-maps" => {
                Some(Self::ConfigMaps)
            }
            "secret" | "secrets" => Some(Self::Secrets),
            "node" | "nodes" | "no" => Some(Self::Nodes),
            "ns" | "namespace" | "namespaces" => Some(Self::Namespaces),
            _ => None,
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(self, Self::Nodes | Self::Namespaces)
    }

    pub fn group(self) -> &'static str {
        match self {
            Self::Deployments | Self::StatefulSets | Self::DaemonSets => "apps",
            Self::Jobs => "batch",
            Self::Ingresses => "networking.k8s.io",
            Self::Pods
            | Self::Services
            | Self::ConfigMaps
            | Self::Secrets
            | Self::Nodes
            | Self::Namespaces => "",
        }
    }
}

/// A listable kind found through API discovery.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CustomKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl CustomKind {
    /// Page name, also the kubectl resource argument (`plural.group`).
    pub fn token(&self) -> String {
        if self.group.is_empty() {
            self.plural.clone()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The built-in page showing the same resource, if there is one.
    pub fn builtin(&self) -> Option<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.token() == self.plural && kind.group() == self.group)
    }
}

/// What a table page lists.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PageKind {
    Resource(ResourceKind),
    ApiResources,
    Custom(CustomKind),
}

impl PageKind {
    pub fn token(&self) -> String {
        match self {
            Self::Resource(kind) => kind.token().to_string(),
            Self::ApiResources => API_RESOURCES.to_string(),
            Self::Custom(custom) => custom.token(),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Resource(kind) => kind.title().to_string(),
            Self::ApiResources => "API Resources".to_string(),
            Self::Custom(custom) => format!("{} ({})", custom.kind, custom.api_version()),
        }
    }

    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            Self::Resource(kind) => Some(*kind),
            Self::ApiResources | Self::Custom(_) => None,
        }
    }

    /// Resource argument for kubectl. The discovery listing has none.
    pub fn kubectl_resource(&self) -> Option<String> {
        match self {
            Self::ApiResources => None,
            Self::Resource(_) | Self::Custom(_) => Some(self.token()),
        }
    }

    pub fn namespaced(&self) -> bool {
        match self {
            Self::Resource(kind) => kind.namespaced(),
            Self::ApiResources => false,
            Self::Custom(custom) => custom.namespaced,
        }
    }

    /// Discovery is expensive, so its page only refreshes on request.
    pub fn polled(&self) -> bool {
        !matches!(self, Self::ApiResources)
    }
}

/// Kinds found by the last discovery run, keyed by page name.
#[derive(Debug, Default)]
pub struct KindCatalog {
    kinds: RwLock<HashMap<String, CustomKind>>,
}

impl KindCatalog {
    pub fn replace(&self, kinds: impl IntoIterator<Item = CustomKind>) {
        let kinds = kinds
            .into_iter()
            .map(|kind| (kind.token(), kind))
            .collect::<HashMap<_, _>>();
        *self.kinds.write().unwrap_or_else(PoisonError::into_inner) = kinds;
    }

    pub fn get(&self, token: &str) -> Option<CustomKind> {
        self.kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    /// Maps a canonical page name to what the page lists.
    pub fn resolve(&self, name: &str) -> Option<PageKind> {
        if name == API_RESOURCES {
            return Some(PageKind::ApiResources);
        }
        if let Some(kind) = ResourceKind::from_token(name)
            && kind.token() == name
        {
            return Some(PageKind::Resource(kind));
        }
        self.get(name).map(PageKind::Custom)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl NamespaceScope {
    pub fn from_arg(value: &str) -> Self {
        match value.trim() {
            "" | "all" | "*" | "-A" => Self::All,
            namespace => Self::Named(namespace.to_string()),
        }
    }
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RowData {
    pub name: String,
    pub namespace: Option<String>,
    pub columns: Vec<String>,
}

impl RowData {
    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();

        if self.name.to_ascii_lowercase().contains(&query_lower) {
            return true;
        }

        if let Some(namespace) = &self.namespace
            && namespace.to_ascii_lowercase().contains(&query_lower)
        {
            return true;
        }

        self.columns
            .iter()
            .any(|column| column.to_ascii_lowercase().contains(&query_lower))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<RowData>,
    pub selected: usize,
    pub selected_column: usize,
    pub filter: String,
    pub last_refreshed: Option<DateTime<Local>>,
}

impl TableData {
    pub fn set_rows(
        &mut self,
        headers: Vec<String>,
        rows: Vec<RowData>,
        refreshed_at: DateTime<Local>,
    ) {
        self.headers = headers;
        self.rows = rows;
        self.last_refreshed = Some(refreshed_at);
        self.clamp_selection();
    }

    /// Takes the fetched content of `fresh`, keeping selection and filter.
    pub fn absorb(&mut self, fresh: TableData) {
        self.headers = fresh.headers;
        self.rows = fresh.rows;
        self.last_refreshed = fresh.last_refreshed;
        self.clamp_selection();
    }

    pub fn visible_rows(&self) -> Vec<&RowData> {
        self.rows
            .iter()
            .filter(|row| row.matches_filter(&self.filter))
            .collect()
    }

    pub fn selected_row(&self) -> Option<&RowData> {
        self.visible_rows().get(self.selected).copied()
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.selected = 0;
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.visible_rows().len();
        if len == 0 {
            self.selected = 0;
            return;
        }

        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }

    pub fn move_column(&mut self, delta: isize) {
        let len = self.headers.len();
        if len == 0 {
            self.selected_column = 0;
            return;
        }

        let next = (self.selected_column as isize + delta).clamp(0, len as isize - 1);
        self.selected_column = next as usize;
    }

    pub fn select_last(&mut self) {
        self.selected = self.visible_rows().len().saturating_sub(1);
    }

    fn clamp_selection(&mut self) {
        let len = self.visible_rows().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CustomKind, KindCatalog, NamespaceScope, PageKind, ResourceKind, RowData, TableData,
    };
    use chrono::Local;

    fn certificates() -> CustomKind {
        CustomKind {
            group: "cert-manager.io".to_string(),
            version: "v1".to_string(),
            kind: "Certificate".to_string(),
            plural: "certificates".to_string(),
            namespaced: true,
        }
    }

    fn row(name: &str, namespace: &str) -> RowData {
        RowData {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            columns: vec![name.to_string(), namespace.to_string()],
        }
    }

    #[test]
    fn resource_aliases_map_to_expected_kinds() {
        assert_eq!(ResourceKind::from_token("po"), Some(ResourceKind::Pods));
        assert_eq!(
            ResourceKind::from_token("Deploy"),
            Some(ResourceKind::Deployments)
        );
        assert_eq!(
            ResourceKind::from_token("sts"),
            Some(ResourceKind::StatefulSets)
        );
        assert_eq!(ResourceKind::from_token("cm"), Some(ResourceKind::ConfigMaps));
        assert_eq!(ResourceKind::from_token("no"), Some(ResourceKind::Nodes));
        assert_eq!(ResourceKind::from_token("crd"), None);
    }

    #[test]
    fn tokens_round_trip_through_from_token() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_token(kind.token()), Some(kind));
        }
    }

    #[test]
    fn namespace_scope_from_arg() {
        assert_eq!(NamespaceScope::from_arg("all"), NamespaceScope::All);
        assert_eq!(
            NamespaceScope::from_arg(" kube-system "),
            NamespaceScope::Named("kube-system".to_string())
        );
    }

    #[test]
    fn selection_is_clamped_when_rows_shrink() {
        let mut table = TableData::default();
        table.set_rows(
            vec!["Name".to_string()],
            vec![row("a", "default"), row("b", "default"), row("c", "default")],
            Local::now(),
        );
        table.move_selection(5);
        assert_eq!(table.selected, 2);

        let mut fresh = TableData::default();
        fresh.set_rows(vec!["Name".to_string()], vec![row("a", "default")], Local::now());
        table.absorb(fresh);
        assert_eq!(table.selected, 0);
        assert_eq!(table.selected_row().map(|row| row.name.as_str()), Some("a"));
    }

    #[test]
    fn filter_limits_visible_rows() {
        let mut table = TableData::default();
        table.set_rows(
            vec!["Name".to_string()],
            vec![row("api", "default"), row("web", "default"), row("db", "kube-system")],
            Local::now(),
        );
        table.set_filter("kube");
        assert_eq!(table.visible_rows().len(), 1);
        assert_eq!(table.selected_row().map(|row| row.name.as_str()), Some("db"));

        table.set_filter("");
        assert_eq!(table.visible_rows().len(), 3);
    }

    #[test]
    fn column_moves_stay_within_headers() {
        let mut table = TableData::default();
        table.set_rows(
            vec!["Name".to_string(), "Namespace".to_string()],
            vec![row("api", "default")],
            Local::now(),
        );
        table.move_column(1);
        assert_eq!(table.selected_column, 1);
        table.move_column(4);
        assert_eq!(table.selected_column, 1);
        table.move_column(-9);
        assert_eq!(table.selected_column, 0);
    }

    #[test]
    fn custom_kind_names_follow_kubectl() {
        let custom = certificates();
        assert_eq!(custom.token(), "certificates.cert-manager.io");
        assert_eq!(custom.api_version(), "cert-manager.io/v1");
        assert_eq!(custom.builtin(), None);

        let deployments = CustomKind {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            plural: "deployments".to_string(),
            namespaced: true,
        };
        assert_eq!(deployments.builtin(), Some(ResourceKind::Deployments));
    }

    #[test]
    fn catalog_resolves_builtin_discovered_and_listing_pages() {
        let catalog = KindCatalog::default();
        assert_eq!(
            catalog.resolve("pods"),
            Some(PageKind::Resource(ResourceKind::Pods))
        );
        assert_eq!(catalog.resolve("api-resources"), Some(PageKind::ApiResources));
        assert_eq!(catalog.resolve("po"), None);
        assert_eq!(catalog.resolve("certificates.cert-manager.io"), None);

        catalog.replace([certificates()]);
        assert_eq!(
            catalog.resolve("certificates.cert-manager.io"),
            Some(PageKind::Custom(certificates()))
        );

        catalog.replace(Vec::<CustomKind>::new());
        assert_eq!(catalog.get("certificates.cert-manager.io"), None);
    }

    #[test]
    fn discovery_page_is_not_polled() {
        assert!(!PageKind::ApiResources.polled());
        assert_eq!(PageKind::ApiResources.kubectl_resource(), None);
        assert_eq!(
            PageKind::Custom(certificates()).kubectl_resource().as_deref(),
            Some("certificates.cert-manager.io")
        );
    }
}
