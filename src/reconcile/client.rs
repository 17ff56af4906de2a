//! Namespaced CRUD access to the cluster
//!
//! Reconciliation only needs get/create/replace/delete and a paged,
//! label-selected list. Objects travel as `DynamicObject` so one client
//! serves every kind; the typed resources are erased at the call site.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// One page of a list call
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    /// Objects on this page
    pub items: Vec<DynamicObject>,
    /// Token for the next page, `None` on the last one
    pub continue_token: Option<String>,
}

/// Trait abstracting namespaced Kubernetes CRUD
///
/// This trait allows the reconcilers to run against a mock or an in-memory
/// cluster in tests while using the real API server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object by name; `None` when it does not exist
    async fn get(&self, resource: &ApiResource, name: &str) -> Result<Option<DynamicObject>>;

    /// Create a new object
    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object
    ///
    /// The object must carry the observed `resourceVersion`.
    async fn replace(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, resource: &ApiResource, name: &str) -> Result<()>;

    /// List one page of objects matching `label_selector`
    async fn list_page(
        &self,
        resource: &ApiResource,
        label_selector: &str,
        continue_token: Option<String>,
    ) -> Result<ObjectPage>;
}

/// Follow continuation tokens until every matching object is collected
pub async fn list_all(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    label_selector: &str,
) -> Result<Vec<DynamicObject>> {
    let mut items = Vec::new();
    let mut token = None;
    loop {
        let page = client.list_page(resource, label_selector, token).await?;
        items.extend(page.items);
        match page.continue_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(items),
        }
    }
}

/// Render `key=value` pairs as a label selector
pub fn selector(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Cluster client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    /// Client writing to `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, resource)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, resource: &ApiResource, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource).get_opt(name).await?)
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        Ok(self.api(resource).create(&PostParams::default(), object).await?)
    }

    async fn replace(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.name_any();
        Ok(self
            .api(resource)
            .replace(&name, &PostParams::default(), object)
            .await?)
    }

    async fn delete(&self, resource: &ApiResource, name: &str) -> Result<()> {
        match self.api(resource).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(kind = %resource.kind, name, "Already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_page(
        &self,
        resource: &ApiResource,
        label_selector: &str,
        continue_token: Option<String>,
    ) -> Result<ObjectPage> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        if let Some(token) = continue_token {
            params = params.continue_token(&token);
        }
        let list = self.api(resource).list(&params).await?;
        Ok(ObjectPage {
            items: list.items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }
}

type ObjectKey = (String, String, String);

fn object_key(resource: &ApiResource, name: &str) -> ObjectKey {
    (resource.group.clone(), resource.plural.clone(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(object: &DynamicObject, label_selector: &str) -> bool {
    let labels = object.labels();
    label_selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (key, value) = match term.split_once("==").or_else(|| term.split_once('=')) {
                Some(pair) => pair,
                None => return labels.contains_key(term),
            };
            labels.get(key).map(String::as_str) == Some(value)
        })
}

/// Cluster held in memory
///
/// Supports equality label selectors and optional pagination. Useful for
/// dry runs and for asserting on the state a sequence of reconciles leaves
/// behind.
#[derive(Default)]
pub struct InMemoryClusterClient {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    page_size: Option<usize>,
    revision: AtomicUsize,
    creates: AtomicUsize,
    replaces: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryClusterClient {
    /// Empty cluster returning every list in one page
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cluster returning lists `page_size` objects at a time
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size.max(1)),
            ..Self::default()
        }
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectKey, DynamicObject>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Stored object, if any
    pub fn object(&self, resource: &ApiResource, name: &str) -> Option<DynamicObject> {
        self.objects().get(&object_key(resource, name)).cloned()
    }

    /// Names of every stored object of one kind
    pub fn names(&self, resource: &ApiResource) -> Vec<String> {
        self.objects()
            .keys()
            .filter(|(group, plural, _)| *group == resource.group && *plural == resource.plural)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Total number of stored objects
    pub fn len(&self) -> usize {
        self.objects().len()
    }

    /// Whether the cluster holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful creates so far
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful replaces so far
    pub fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    /// Number of deletes of existing objects so far
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn get(&self, resource: &ApiResource, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.object(resource, name))
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.name_any();
        let key = object_key(resource, &name);
        let mut objects = self.objects();
        if objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {name} already exists", resource.kind),
            ));
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(self.next_revision());
        objects.insert(key, stored.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.name_any();
        let key = object_key(resource, &name);
        let mut objects = self.objects();
        let observed = objects
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} {name} not found", resource.kind)))?;
        if object.metadata.resource_version.is_some()
            && object.metadata.resource_version != observed.metadata.resource_version
        {
            return Err(api_error(
                409,
                "Conflict",
                format!("{} {name} was modified", resource.kind),
            ));
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(self.next_revision());
        objects.insert(key, stored.clone());
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, name: &str) -> Result<()> {
        if self.objects().remove(&object_key(resource, name)).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn list_page(
        &self,
        resource: &ApiResource,
        label_selector: &str,
        continue_token: Option<String>,
    ) -> Result<ObjectPage> {
        let offset = match continue_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| api_error(410, "Expired", format!("invalid continue token {token}")))?,
            None => 0,
        };
        let matching: Vec<DynamicObject> = self
            .objects()
            .iter()
            .filter(|((group, plural, _), _)| *group == resource.group && *plural == resource.plural)
            .map(|(_, object)| object)
            .filter(|object| matches_selector(object, label_selector))
            .cloned()
            .collect();

        let page_size = self.page_size.unwrap_or(usize::MAX);
        let items: Vec<DynamicObject> = matching.iter().skip(offset).take(page_size).cloned().collect();
        let next = offset.saturating_add(items.len());
        Ok(ObjectPage {
            items,
            continue_token: (next < matching.len()).then(|| next.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Scope;

    fn scope_resource() -> ApiResource {
        ApiResource::erase::<Scope>(&())
    }

    fn object(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &scope_resource());
        obj.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        obj
    }

    #[test]
    fn test_selector_rendering() {
        assert_eq!(selector(&[("apiUUID", "a1"), ("InitiateFrom", "CP")]), "apiUUID=a1,InitiateFrom=CP");
        assert_eq!(selector(&[]), "");
    }

    #[test]
    fn test_selector_matching() {
        let obj = object("s", &[("apiUUID", "a1"), ("organization", "o")]);
        assert!(matches_selector(&obj, ""));
        assert!(matches_selector(&obj, "apiUUID=a1"));
        assert!(matches_selector(&obj, "apiUUID==a1, organization=o"));
        assert!(matches_selector(&obj, "organization"));
        assert!(!matches_selector(&obj, "apiUUID=a2"));
        assert!(!matches_selector(&obj, "apiUUID=a1,revisionID=1"));
    }

    #[tokio::test]
    async fn test_create_get_replace_delete() {
        let cluster = InMemoryClusterClient::new();
        let ar = scope_resource();

        let created = cluster.create(&ar, &object("s1", &[])).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert!(cluster.create(&ar, &object("s1", &[])).await.is_err());

        let mut observed = cluster.get(&ar, "s1").await.unwrap().unwrap();
        observed.labels_mut().insert("k".to_string(), "v".to_string());
        cluster.replace(&ar, &observed).await.unwrap();
        assert_eq!(cluster.object(&ar, "s1").unwrap().labels()["k"], "v");

        cluster.delete(&ar, "s1").await.unwrap();
        cluster.delete(&ar, "s1").await.unwrap();
        assert!(cluster.get(&ar, "s1").await.unwrap().is_none());
        assert_eq!((cluster.creates(), cluster.replaces(), cluster.deletes()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found() {
        let cluster = InMemoryClusterClient::new();
        let err = cluster.replace(&scope_resource(), &object("nope", &[])).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let cluster = InMemoryClusterClient::new();
        let ar = scope_resource();
        cluster.create(&ar, &object("s1", &[])).await.unwrap();
        let stale = cluster.get(&ar, "s1").await.unwrap().unwrap();
        cluster.replace(&ar, &stale).await.unwrap();

        let err = cluster.replace(&ar, &stale).await.unwrap_err();
        assert!(err.is_retryable());
    }

    /// Story: Listing follows continuation tokens across pages
    #[tokio::test]
    async fn story_list_all_follows_pages() {
        let cluster = InMemoryClusterClient::with_page_size(2);
        let ar = scope_resource();
        for i in 0..5 {
            cluster
                .create(&ar, &object(&format!("s{i}"), &[("apiUUID", "a1")]))
                .await
                .unwrap();
        }
        cluster.create(&ar, &object("other", &[("apiUUID", "a2")])).await.unwrap();

        let first = cluster.list_page(&ar, "apiUUID=a1", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.continue_token.is_some());

        let all = list_all(&cluster, &ar, "apiUUID=a1").await.unwrap();
        let names: Vec<String> = all.iter().map(|o| o.name_any()).collect();
        assert_eq!(names, vec!["s0", "s1", "s2", "s3", "s4"]);
    }

    #[tokio::test]
    async fn test_list_all_on_mock_stops_at_last_page() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_page()
            .withf(|_, _, token| token.is_none())
            .times(1)
            .returning(|_, _, _| {
                Ok(ObjectPage {
                    items: vec![object("a", &[])],
                    continue_token: Some("t1".to_string()),
                })
            });
        mock.expect_list_page()
            .withf(|_, _, token| token.as_deref() == Some("t1"))
            .times(1)
            .returning(|_, _, _| {
                Ok(ObjectPage {
                    items: vec![object("b", &[])],
                    continue_token: None,
                })
            });

        let all = list_all(&mock, &scope_resource(), "").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
