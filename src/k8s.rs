use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, PodStatus, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ListParams;
use kube::config::Kubeconfig;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope, verbs};
use kube::runtime::watcher::{Config as WatchConfig, watcher};
use kube::{Api, Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::model::{
    CustomKind, KindCatalog, NamespaceScope, PageKind, ResourceKind, RowData, TableData,
};
use crate::page::TableSource;

const TABLE_REFRESH_TIMEOUT: Duration = Duration::from_secs(4);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const WATCH_RESTART_DELAY: Duration = Duration::from_millis(900);

const POD_HEADERS: &[&str] = &["Name", "Namespace", "Node", "Ready", "Status", "Restarts", "Age"];
const DEPLOYMENT_HEADERS: &[&str] = &["Name", "Namespace", "Ready", "Updated", "Available", "Age"];
const STATEFULSET_HEADERS: &[&str] = &["Name", "Namespace", "Ready", "Current", "Age"];
const DAEMONSET_HEADERS: &[&str] = &["Name", "Namespace", "Ready", "Updated", "Available", "Age"];
const JOB_HEADERS: &[&str] = &["Name", "Namespace", "Completions", "Active", "Failed", "Age"];
const SERVICE_HEADERS: &[&str] = &["Name", "Namespace", "Type", "Cluster IP", "Ports", "Age"];
const INGRESS_HEADERS: &[&str] = &["Name", "Namespace", "Class", "Hosts", "Address", "Age"];
const CONFIGMAP_HEADERS: &[&str] = &["Name", "Namespace", "Data", "Age"];
const SECRET_HEADERS: &[&str] = &["Name", "Namespace", "Type", "Data", "Age"];
const NODE_HEADERS: &[&str] = &["Name", "Status", "Roles", "Version", "Age"];
const NAMESPACE_HEADERS: &[&str] = &["Name", "Status", "Age"];
const API_RESOURCE_HEADERS: &[&str] = &["Name", "API Version", "Kind", "Namespaced"];
const CUSTOM_HEADERS: &[&str] = &["Name", "Namespace", "Labels", "Age"];
const CLUSTER_CUSTOM_HEADERS: &[&str] = &["Name", "Labels", "Age"];

type Listing = (&'static [&'static str], Vec<RowData>);

pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    default_namespace: String,
    catalog: Arc<KindCatalog>,
}

impl KubeGateway {
    pub async fn new() -> Result<Self> {
        let config = Config::infer()
            .await
            .context("failed to infer Kubernetes configuration")?;
        let cluster = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        let context = Kubeconfig::read()
            .ok()
            .and_then(|kubeconfig| kubeconfig.current_context)
            .unwrap_or_else(|| "in-cluster".to_string());

        Ok(Self {
            client,
            context,
            cluster,
            default_namespace,
            catalog: Arc::new(KindCatalog::default()),
        })
    }

    /// Kinds found by the last visit to the api-resources page.
    pub fn catalog(&self) -> Arc<KindCatalog> {
        self.catalog.clone()
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub async fn server_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context("failed to query API server version")?;
        Ok(info.git_version)
    }

    pub async fn list_table(&self, kind: &PageKind, scope: &NamespaceScope) -> Result<TableData> {
        let refreshed_at = Local::now();
        let (headers, mut rows) = match kind {
            PageKind::Resource(resource) => self.resource_listing(*resource, scope).await?,
            PageKind::ApiResources => (API_RESOURCE_HEADERS, self.api_resource_rows().await?),
            PageKind::Custom(custom) => {
                let headers = if custom.namespaced {
                    CUSTOM_HEADERS
                } else {
                    CLUSTER_CUSTOM_HEADERS
                };
                (headers, self.custom_rows(custom, scope).await?)
            }
        };

        rows.sort_by(|left, right| {
            left.namespace
                .cmp(&right.namespace)
                .then_with(|| left.name.cmp(&right.name))
        });

        let mut table = TableData::default();
        table.set_rows(
            headers.iter().map(|header| header.to_string()).collect(),
            rows,
            refreshed_at,
        );
        Ok(table)
    }

    async fn resource_listing(&self, kind: ResourceKind, scope: &NamespaceScope) -> Result<Listing> {
        Ok(match kind {
            ResourceKind::Pods => (POD_HEADERS, self.namespaced_rows(scope, pod_row).await?),
            ResourceKind::Deployments => (
                DEPLOYMENT_HEADERS,
                self.namespaced_rows(scope, deployment_row).await?,
            ),
            ResourceKind::StatefulSets => (
                STATEFULSET_HEADERS,
                self.namespaced_rows(scope, statefulset_row).await?,
            ),
            ResourceKind::DaemonSets => (
                DAEMONSET_HEADERS,
                self.namespaced_rows(scope, daemonset_row).await?,
            ),
            ResourceKind::Jobs => (JOB_HEADERS, self.namespaced_rows(scope, job_row).await?),
            ResourceKind::Services => (
                SERVICE_HEADERS,
                self.namespaced_rows(scope, service_row).await?,
            ),
            ResourceKind::Ingresses => (
                INGRESS_HEADERS,
                self.namespaced_rows(scope, ingress_row).await?,
            ),
            ResourceKind::ConfigMaps => (
                CONFIGMAP_HEADERS,
                self.namespaced_rows(scope, configmap_row).await?,
            ),
            ResourceKind::Secrets => (
                SECRET_HEADERS,
                self.namespaced_rows(scope, secret_row).await?,
            ),
            ResourceKind::Nodes => (NODE_HEADERS, self.cluster_rows(node_row).await?),
            ResourceKind::Namespaces => {
                (NAMESPACE_HEADERS, self.cluster_rows(namespace_row).await?)
            }
        })
    }

    /// Runs API discovery, records every listable kind in the catalog and
    /// returns one row per kind.
    async fn api_resource_rows(&self) -> Result<Vec<RowData>> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .context("API discovery failed")?;

        let mut kinds = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                if !capabilities.supports_operation(verbs::LIST) {
                    continue;
                }
                kinds.push(CustomKind {
                    group: resource.group,
                    version: resource.version,
                    kind: resource.kind,
                    plural: resource.plural,
                    namespaced: matches!(capabilities.scope, Scope::Namespaced),
                });
            }
        }

        debug!(kinds = kinds.len(), "api discovery finished");
        let rows = kinds.iter().map(api_resource_row).collect();
        self.catalog.replace(kinds);
        Ok(rows)
    }

    async fn custom_rows(&self, custom: &CustomKind, scope: &NamespaceScope) -> Result<Vec<RowData>> {
        let gvk = GroupVersionKind::gvk(&custom.group, &custom.version, &custom.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &custom.plural);
        let resources: Api<DynamicObject> = if custom.namespaced {
            match scope {
                NamespaceScope::All => Api::all_with(self.client.clone(), &api_resource),
                NamespaceScope::Named(namespace) => {
                    Api::namespaced_with(self.client.clone(), namespace, &api_resource)
                }
            }
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        };

        let list = resources.list(&list_params()).await?;
        Ok(list
            .items
            .iter()
            .map(|object| dynamic_row(object, custom.namespaced))
            .collect())
    }

    async fn namespaced_rows<K>(
        &self,
        scope: &NamespaceScope,
        to_row: fn(&K) -> RowData,
    ) -> Result<Vec<RowData>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = match scope {
            NamespaceScope::All => Api::all(self.client.clone()),
            NamespaceScope::Named(namespace) => Api::namespaced(self.client.clone(), namespace),
        };
        let list = api.list(&list_params()).await?;
        Ok(list.items.iter().map(to_row).collect())
    }

    async fn cluster_rows<K>(&self, to_row: fn(&K) -> RowData) -> Result<Vec<RowData>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&list_params()).await?;
        Ok(list.items.iter().map(to_row).collect())
    }
}

impl TableSource for KubeGateway {
    fn fetch_table<'a>(
        &'a self,
        kind: &'a PageKind,
        scope: &'a NamespaceScope,
    ) -> BoxFuture<'a, Result<TableData>> {
        let limit = match kind {
            PageKind::ApiResources => DISCOVERY_TIMEOUT,
            PageKind::Resource(_) | PageKind::Custom(_) => TABLE_REFRESH_TIMEOUT,
        };
        Box::pin(async move {
            timeout(limit, self.list_table(kind, scope))
                .await
                .with_context(|| format!("listing {} timed out", kind.title()))?
        })
    }
}

/// Spawns one watcher per kind; `notify` runs on every change event.
pub fn start_watchers(
    client: Client,
    notify: Arc<dyn Fn(ResourceKind) + Send + Sync>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_watch_task::<Pod>(client.clone(), ResourceKind::Pods, notify.clone()),
        spawn_watch_task::<Deployment>(client.clone(), ResourceKind::Deployments, notify.clone()),
        spawn_watch_task::<StatefulSet>(client.clone(), ResourceKind::StatefulSets, notify.clone()),
        spawn_watch_task::<DaemonSet>(client.clone(), ResourceKind::DaemonSets, notify.clone()),
        spawn_watch_task::<Job>(client.clone(), ResourceKind::Jobs, notify.clone()),
        spawn_watch_task::<Service>(client.clone(), ResourceKind::Services, notify.clone()),
        spawn_watch_task::<Ingress>(client.clone(), ResourceKind::Ingresses, notify.clone()),
        spawn_watch_task::<ConfigMap>(client.clone(), ResourceKind::ConfigMaps, notify.clone()),
        spawn_watch_task::<Secret>(client.clone(), ResourceKind::Secrets, notify.clone()),
        spawn_watch_task::<Node>(client.clone(), ResourceKind::Nodes, notify.clone()),
        spawn_watch_task::<Namespace>(client, ResourceKind::Namespaces, notify),
    ]
}

fn spawn_watch_task<K>(
    client: Client,
    kind: ResourceKind,
    notify: Arc<dyn Fn(ResourceKind) + Send + Sync>,
) -> JoinHandle<()>
where
    K: Clone + Debug + DeserializeOwned + Resource + Send + 'static,
    <K as Resource>::DynamicType: Default + Eq + std::hash::Hash + Clone + Send,
{
    tokio::spawn(async move {
        loop {
            let api: Api<K> = Api::all(client.clone());
            let mut events = watcher(api, WatchConfig::default()).boxed();
            loop {
                match events.try_next().await {
                    Ok(Some(_)) => notify(kind),
                    Ok(None) => break,
                    Err(error) => {
                        warn!(kind = kind.token(), %error, "watch stream error");
                        break;
                    }
                }
            }
            debug!(kind = kind.token(), "restarting watch stream");
            tokio::time::sleep(WATCH_RESTART_DELAY).await;
        }
    })
}

fn namespaced_row(name: String, namespace: Option<String>, rest: Vec<String>) -> RowData {
    let mut columns = vec![name.clone(), namespace.clone().unwrap_or_else(|| "-".to_string())];
    columns.extend(rest);
    RowData {
        name,
        namespace,
        columns,
    }
}

fn pod_row(pod: &Pod) -> RowData {
    let status = pod
        .status
        .as_ref()
        .and_then(|value| value.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let (ready, total, restarts) = pod.status.as_ref().map(pod_readiness).unwrap_or((0, 0, 0));

    namespaced_row(
        pod.name_any(),
        pod.namespace(),
        vec![
            node,
            format!("{ready}/{total}"),
            status,
            restarts.to_string(),
            human_age(pod.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn deployment_row(deployment: &Deployment) -> RowData {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|status| status.updated_replicas).unwrap_or(0);
    let available = status
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);

    namespaced_row(
        deployment.name_any(),
        deployment.namespace(),
        vec![
            format!("{ready}/{desired}"),
            updated.to_string(),
            available.to_string(),
            human_age(deployment.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn statefulset_row(statefulset: &StatefulSet) -> RowData {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = statefulset.status.as_ref();
    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    let current = status
        .and_then(|status| status.current_replicas)
        .unwrap_or(0);

    namespaced_row(
        statefulset.name_any(),
        statefulset.namespace(),
        vec![
            format!("{ready}/{desired}"),
            current.to_string(),
            human_age(statefulset.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn daemonset_row(daemonset: &DaemonSet) -> RowData {
    let status = daemonset.status.as_ref();
    let desired = status
        .map(|status| status.desired_number_scheduled)
        .unwrap_or(0);
    let ready = status.map(|status| status.number_ready).unwrap_or(0);
    let updated = status
        .and_then(|status| status.updated_number_scheduled)
        .unwrap_or(0);
    let available = status
        .and_then(|status| status.number_available)
        .unwrap_or(0);

    namespaced_row(
        daemonset.name_any(),
        daemonset.namespace(),
        vec![
            format!("{ready}/{desired}"),
            updated.to_string(),
            available.to_string(),
            human_age(daemonset.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn job_row(job: &Job) -> RowData {
    let desired = job
        .spec
        .as_ref()
        .and_then(|spec| spec.completions)
        .unwrap_or(1);
    let status = job.status.as_ref();
    let succeeded = status.and_then(|status| status.succeeded).unwrap_or(0);
    let active = status.and_then(|status| status.active).unwrap_or(0);
    let failed = status.and_then(|status| status.failed).unwrap_or(0);

    namespaced_row(
        job.name_any(),
        job.namespace(),
        vec![
            format!("{succeeded}/{desired}"),
            active.to_string(),
            failed.to_string(),
            human_age(job.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn service_row(service: &Service) -> RowData {
    let spec = service.spec.as_ref();
    let service_type = spec
        .and_then(|spec| spec.type_.clone())
        .unwrap_or_else(|| "ClusterIP".to_string());
    let cluster_ip = spec
        .and_then(|spec| spec.cluster_ip.clone())
        .unwrap_or_else(|| "-".to_string());
    let ports = spec
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|port| {
                    let protocol = port.protocol.as_deref().unwrap_or("TCP");
                    format!("{}/{protocol}", port.port)
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .filter(|ports| !ports.is_empty())
        .unwrap_or_else(|| "-".to_string());

    namespaced_row(
        service.name_any(),
        service.namespace(),
        vec![
            service_type,
            cluster_ip,
            ports,
            human_age(service.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn ingress_row(ingress: &Ingress) -> RowData {
    let spec = ingress.spec.as_ref();
    let class = spec
        .and_then(|spec| spec.ingress_class_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let hosts = spec
        .and_then(|spec| spec.rules.as_ref())
        .map(|rules| {
            rules
                .iter()
                .filter_map(|rule| rule.host.clone())
                .collect::<Vec<_>>()
                .join(",")
        })
        .filter(|hosts| !hosts.is_empty())
        .map(|hosts| truncate(&hosts, 28))
        .unwrap_or_else(|| "-".to_string());
    let address = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.ip.clone().or_else(|| entry.hostname.clone()))
        .unwrap_or_else(|| "-".to_string());

    namespaced_row(
        ingress.name_any(),
        ingress.namespace(),
        vec![
            class,
            hosts,
            truncate(&address, 20),
            human_age(ingress.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn configmap_row(configmap: &ConfigMap) -> RowData {
    let entries = configmap.data.as_ref().map(|data| data.len()).unwrap_or(0)
        + configmap
            .binary_data
            .as_ref()
            .map(|data| data.len())
            .unwrap_or(0);

    namespaced_row(
        configmap.name_any(),
        configmap.namespace(),
        vec![
            entries.to_string(),
            human_age(configmap.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn secret_row(secret: &Secret) -> RowData {
    let secret_type = secret.type_.as_deref().unwrap_or("Opaque");
    let entries = secret.data.as_ref().map(|data| data.len()).unwrap_or(0);

    namespaced_row(
        secret.name_any(),
        secret.namespace(),
        vec![
            truncate(secret_type, 20),
            entries.to_string(),
            human_age(secret.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn node_row(node: &Node) -> RowData {
    let status = node.status.as_ref();
    let ready = status
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|condition| condition.type_ == "Ready"))
        .map(|condition| match condition.status.as_str() {
            "True" => "Ready",
            "False" => "NotReady",
            _ => "Unknown",
        })
        .unwrap_or("Unknown");
    let version = status
        .and_then(|status| status.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_else(|| "-".to_string());
    let name = node.name_any();

    RowData {
        name: name.clone(),
        namespace: None,
        columns: vec![
            name,
            ready.to_string(),
            node_roles(node),
            version,
            human_age(node.metadata.creation_timestamp.as_ref()),
        ],
    }
}

fn namespace_row(namespace: &Namespace) -> RowData {
    let phase = namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Active".to_string());
    let name = namespace.name_any();

    RowData {
        name: name.clone(),
        namespace: None,
        columns: vec![
            name,
            phase,
            human_age(namespace.metadata.creation_timestamp.as_ref()),
        ],
    }
}

fn api_resource_row(custom: &CustomKind) -> RowData {
    RowData {
        name: custom.token(),
        namespace: None,
        columns: vec![
            custom.plural.clone(),
            custom.api_version(),
            custom.kind.clone(),
            custom.namespaced.to_string(),
        ],
    }
}

fn dynamic_row(object: &DynamicObject, namespaced: bool) -> RowData {
    let labels = object
        .metadata
        .labels
        .as_ref()
        .map(|labels| labels.len())
        .unwrap_or(0)
        .to_string();
    let age = human_age(object.metadata.creation_timestamp.as_ref());

    if namespaced {
        return namespaced_row(object.name_any(), object.namespace(), vec![labels, age]);
    }

    let name = object.name_any();
    RowData {
        name: name.clone(),
        namespace: None,
        columns: vec![name, labels, age],
    }
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn pod_readiness(status: &PodStatus) -> (usize, usize, i32) {
    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    let total = container_statuses.len();
    let ready = container_statuses
        .iter()
        .filter(|container| container.ready)
        .count();
    let restarts = container_statuses
        .iter()
        .map(|container| container.restart_count)
        .sum();

    (ready, total, restarts)
}

fn node_roles(node: &Node) -> String {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return "-".to_string();
    };

    let mut roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
        .map(|role| if role.is_empty() { "worker" } else { role })
        .map(str::to_string)
        .collect::<Vec<_>>();

    if roles.is_empty() {
        return labels
            .get("kubernetes.io/role")
            .cloned()
            .unwrap_or_else(|| "-".to_string());
    }

    roles.sort();
    roles.dedup();
    roles.join(",")
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }

    let mut out = value
        .chars()
        .take(max.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };

    let elapsed = k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second();
    format_elapsed_seconds(elapsed.max(0))
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
