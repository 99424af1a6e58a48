//! The cluster verbs the harness speaks, and their kube-backed implementation.
//!
//! Every call is a single round trip. Retrying is the business of the drivers in
//! [`crate::retry`].
#[cfg(test)]
pub(crate) mod fake;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::Scope,
    Api, Client,
};
use serde_json::Value;
use tracing::debug;

use crate::{error::ClientError, object::NamespacedName};

/// Restricts list and bulk delete operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only consider resources in this namespace. All namespaces when unset.
    pub namespace: Option<String>,
    /// Label selector, e.g. `app=dashboard,tier!=db`.
    pub label_selector: Option<String>,
    /// Field selector, e.g. `metadata.name=default-dsc`.
    pub field_selector: Option<String>,
}

impl ListFilter {
    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = &self.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            params = params.fields(fields);
        }
        params
    }
}

/// How dependents of a deleted resource are handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are deleted before the owner disappears.
    Foreground,
    /// The owner disappears immediately and dependents are collected later.
    Background,
    /// Dependents are left behind.
    Orphan,
}

/// Options of a delete call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Propagation policy. The server default applies when unset.
    pub propagation: Option<Propagation>,
    /// Grace period in seconds.
    pub grace_period: Option<u32>,
}

impl DeleteOptions {
    fn delete_params(&self) -> DeleteParams {
        let mut params = match self.propagation {
            Some(Propagation::Foreground) => DeleteParams::foreground(),
            Some(Propagation::Background) => DeleteParams::background(),
            Some(Propagation::Orphan) => DeleteParams::orphan(),
            None => DeleteParams::default(),
        };
        params.grace_period_seconds = self.grace_period;
        params
    }
}

/// The verbs the harness needs from a cluster.
///
/// A missing instance is reported by `get` as `Ok(None)`, while a missing kind is
/// always [`ClientError::NoMatch`], so callers can tell a resource that may still
/// appear from one that never will.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Read one resource.
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
    ) -> Result<Option<DynamicObject>, ClientError>;

    /// List resources in the order the server returns them.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
    ) -> Result<Vec<DynamicObject>, ClientError>;

    /// Create a resource.
    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Replace a resource, guarded by its resource version when it carries one.
    async fn replace(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Apply a JSON merge patch.
    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError>;

    /// Replace the status subresource with the status of `obj`, guarded by its
    /// resource version. Everything outside `.status` is ignored.
    async fn replace_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Apply a JSON merge patch to the status subresource.
    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError>;

    /// Delete a resource.
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError>;

    /// Delete every resource of a kind matching a filter.
    async fn delete_collection(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError>;
}

/// [`ResourceClient`] backed by a kube [`Client`].
///
/// Kinds are resolved through API discovery once and cached for the lifetime of
/// the client.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    kinds: Arc<Mutex<HashMap<GroupVersionKind, (ApiResource, bool)>>>,
}

impl KubeResourceClient {
    /// Wrap a kube client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: Default::default(),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration.
    pub async fn try_default() -> Result<Self, ClientError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Register a kind without going through discovery.
    pub fn register(&self, resource: ApiResource, namespaced: bool) {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        self.kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvk, (resource, namespaced));
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), ClientError> {
        let cached = self
            .kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(gvk)
            .cloned();
        if let Some(found) = cached {
            return Ok(found);
        }
        let (resource, capabilities) = kube::discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|err| match err {
                // An unknown kind in a known group fails discovery, an unknown group
                // is a 404 from the API server.
                kube::Error::Discovery(_) => ClientError::NoMatch { gvk: gvk.clone() },
                kube::Error::Api(response) if response.code == 404 => {
                    ClientError::NoMatch { gvk: gvk.clone() }
                }
                other => ClientError::from_kube(other),
            })?;
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        debug!(kind = %gvk.kind, plural = %resource.plural, namespaced, "discovered kind");
        self.register(resource.clone(), namespaced);
        Ok((resource, namespaced))
    }

    // Api scoped to one object. Namespaced kinds without a namespace use the
    // client's default namespace.
    async fn object_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClientError> {
        let (resource, namespaced) = self.resolve(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &resource),
            (false, _) => Api::all_with(self.client.clone(), &resource),
        })
    }

    // Api for list style calls. Namespaced kinds without a namespace span all
    // namespaces.
    async fn collection_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClientError> {
        let (resource, namespaced) = self.resolve(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
    ) -> Result<Option<DynamicObject>, ClientError> {
        let api = self.object_api(gvk, nn.namespace.as_deref()).await?;
        api.get_opt(&nn.name).await.map_err(ClientError::from_kube)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let api = self
            .collection_api(gvk, filter.namespace.as_deref())
            .await?;
        let list = api
            .list(&filter.list_params())
            .await
            .map_err(ClientError::from_kube)?;
        Ok(list.items)
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let api = self
            .object_api(gvk, obj.metadata.namespace.as_deref())
            .await?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(ClientError::from_kube)
    }

    async fn replace(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let api = self
            .object_api(gvk, obj.metadata.namespace.as_deref())
            .await?;
        api.replace(name_of(obj), &PostParams::default(), obj)
            .await
            .map_err(ClientError::from_kube)
    }

    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError> {
        let api = self.object_api(gvk, nn.namespace.as_deref()).await?;
        api.patch(&nn.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ClientError::from_kube)
    }

    async fn replace_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let api = self
            .object_api(gvk, obj.metadata.namespace.as_deref())
            .await?;
        let body = serde_json::to_vec(obj)?;
        api.replace_status(name_of(obj), &PostParams::default(), body)
            .await
            .map_err(ClientError::from_kube)
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError> {
        let api = self.object_api(gvk, nn.namespace.as_deref()).await?;
        api.patch_status(&nn.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ClientError::from_kube)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let api = self.object_api(gvk, nn.namespace.as_deref()).await?;
        api.delete(&nn.name, &opts.delete_params())
            .await
            .map(|_| ())
            .map_err(ClientError::from_kube)
    }

    async fn delete_collection(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let api = self
            .collection_api(gvk, filter.namespace.as_deref())
            .await?;
        api.delete_collection(&opts.delete_params(), &filter.list_params())
            .await
            .map(|_| ())
            .map_err(ClientError::from_kube)
    }
}
