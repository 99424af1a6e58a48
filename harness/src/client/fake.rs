//! In-memory [`ResourceClient`] for exercising the lifecycle operations.
//!
//! Behaves like a small API server: kinds must be registered, writes assign UIDs
//! and resource versions, finalizers hold deletion, and faults can be injected.
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
use kube::{api::DynamicObject, core::GroupVersionKind, ResourceExt};
use serde_json::Value;

use super::{DeleteOptions, ListFilter, Propagation, ResourceClient};
use crate::{
    error::ClientError,
    object::{self, NamespacedName},
};

type Key = (String, Option<String>, String);
type AdmissionFn = dyn Fn(&str, &DynamicObject) -> Option<ClientError> + Send + Sync;

fn key(gvk: &GroupVersionKind, nn: &NamespacedName) -> Key {
    (
        format!("{}/{}", gvk.api_version(), gvk.kind),
        nn.namespace.clone().filter(|ns| !ns.is_empty()),
        nn.name.clone(),
    )
}

struct Pending {
    reads_left: usize,
    gvk: GroupVersionKind,
    obj: DynamicObject,
}

#[derive(Default)]
struct State {
    kinds: HashMap<GroupVersionKind, bool>,
    objects: BTreeMap<Key, DynamicObject>,
    revision: u64,
    uids: u64,
    conflicts: usize,
    read_faults: VecDeque<ClientError>,
    admission: Vec<Arc<AdmissionFn>>,
    recreate: HashMap<Key, usize>,
    pending: Vec<Pending>,
    deletions: Vec<(NamespacedName, Option<Propagation>)>,
    writes: usize,
}

impl State {
    fn check_kind(&self, gvk: &GroupVersionKind) -> Result<bool, ClientError> {
        self.kinds
            .get(gvk)
            .copied()
            .ok_or_else(|| ClientError::NoMatch { gvk: gvk.clone() })
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uids += 1;
        format!("uid-{}", self.uids)
    }

    // Every read moves delayed objects closer to appearing.
    fn tick(&mut self) {
        let mut due = Vec::new();
        for pending in &mut self.pending {
            if pending.reads_left == 0 {
                continue;
            }
            pending.reads_left -= 1;
            if pending.reads_left == 0 {
                due.push((pending.gvk.clone(), pending.obj.clone()));
            }
        }
        self.pending.retain(|p| p.reads_left > 0);
        for (gvk, obj) in due {
            self.insert_new(&gvk, obj);
        }
    }

    fn insert_new(&mut self, gvk: &GroupVersionKind, obj: DynamicObject) -> DynamicObject {
        let mut obj = object::with_types(obj, gvk);
        obj.metadata.uid = Some(self.next_uid());
        obj.metadata.resource_version = Some(self.next_revision());
        obj.metadata.generation = Some(1);
        self.objects
            .insert(key(gvk, &NamespacedName::of(&obj)), obj.clone());
        obj
    }

    fn admit(&self, operation: &str, obj: &DynamicObject) -> Result<(), ClientError> {
        match self.admission.iter().find_map(|hook| hook(operation, obj)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn take_conflict(&mut self) -> Result<(), ClientError> {
        if self.conflicts > 0 {
            self.conflicts -= 1;
            return Err(ClientError::status(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version and try again",
            ));
        }
        Ok(())
    }

    // Updates carrying a resource version must carry the stored one.
    fn check_version(existing: &DynamicObject, obj: &DynamicObject) -> Result<(), ClientError> {
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != existing.metadata.resource_version
        {
            return Err(ClientError::status(
                409,
                "Conflict",
                "the object has been modified",
            ));
        }
        Ok(())
    }

    fn store_update(&mut self, gvk: &GroupVersionKind, mut obj: DynamicObject) -> DynamicObject {
        obj.metadata.resource_version = Some(self.next_revision());
        let k = key(gvk, &NamespacedName::of(&obj));
        if obj.metadata.deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            self.remove(gvk, &k);
        } else {
            self.objects.insert(k, obj.clone());
        }
        obj
    }

    fn remove(&mut self, gvk: &GroupVersionKind, k: &Key) {
        let Some(removed) = self.objects.remove(k) else {
            return;
        };
        if let Some(reads) = self.recreate.get(k).copied() {
            let mut fresh = object::strip_server_fields(removed);
            fresh.metadata.finalizers = None;
            self.pending.push(Pending {
                reads_left: reads.max(1),
                gvk: gvk.clone(),
                obj: fresh,
            });
        }
    }

    fn delete(
        &mut self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let k = key(gvk, nn);
        if !self.objects.contains_key(&k) {
            return Err(not_found(gvk, nn));
        }
        self.deletions.push((nn.clone(), opts.propagation));
        match self.objects.get_mut(&k) {
            Some(held) if !held.finalizers().is_empty() => {
                if held.metadata.deletion_timestamp.is_none() {
                    held.metadata.deletion_timestamp = Some(Time(Utc::now()));
                }
            }
            _ => self.remove(gvk, &k),
        }
        Ok(())
    }
}

fn not_found(gvk: &GroupVersionKind, nn: &NamespacedName) -> ClientError {
    ClientError::status(
        404,
        "NotFound",
        format!("{}s \"{}\" not found", gvk.kind.to_lowercase(), nn.name),
    )
}

fn matches_filter(obj: &DynamicObject, filter: &ListFilter) -> bool {
    if let Some(ns) = &filter.namespace {
        if obj.metadata.namespace.as_ref() != Some(ns) {
            return false;
        }
    }
    let labels = obj.labels();
    filter
        .label_selector
        .iter()
        .flat_map(|selector| selector.split(','))
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once("!=") {
            Some((k, v)) => labels.get(k).map(String::as_str) != Some(v),
            None => match term.split_once('=') {
                Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
                None => labels.contains_key(term),
            },
        })
}

/// An in-memory cluster.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// A cluster knowing the given kinds, as `(gvk, namespaced)`.
    pub fn with_kinds(kinds: impl IntoIterator<Item = (GroupVersionKind, bool)>) -> Self {
        let cluster = Self::default();
        cluster.state().kinds.extend(kinds);
        cluster
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    /// Store an object as if it had been created earlier.
    pub fn seed(&self, gvk: &GroupVersionKind, obj: DynamicObject) -> DynamicObject {
        self.state().insert_new(gvk, obj)
    }

    /// Make an object appear after the given number of reads.
    pub fn appear_after_reads(&self, gvk: &GroupVersionKind, obj: DynamicObject, reads: usize) {
        self.state().pending.push(Pending {
            reads_left: reads.max(1),
            gvk: gvk.clone(),
            obj,
        });
    }

    /// Recreate the object with a new identity after it is deleted, as a
    /// controller would. It reappears after the given number of reads.
    pub fn recreate_on_delete(&self, gvk: &GroupVersionKind, nn: &NamespacedName, reads: usize) {
        self.state().recreate.insert(key(gvk, nn), reads);
    }

    /// Fail the next `n` updates or patches with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.state().conflicts = n;
    }

    /// Fail the next read with the given error.
    pub fn fail_next_read(&self, err: ClientError) {
        self.state().read_faults.push_back(err);
    }

    /// Install an admission hook called with `create` or `update` and the object
    /// about to be persisted.
    pub fn admission(
        &self,
        hook: impl Fn(&str, &DynamicObject) -> Option<ClientError> + Send + Sync + 'static,
    ) {
        self.state().admission.push(Arc::new(hook));
    }

    /// The stored object, bypassing delays and faults.
    pub fn stored(&self, gvk: &GroupVersionKind, nn: &NamespacedName) -> Option<DynamicObject> {
        self.state().objects.get(&key(gvk, nn)).cloned()
    }

    /// Delete calls observed so far.
    pub fn deletions(&self) -> Vec<(NamespacedName, Option<Propagation>)> {
        self.state().deletions.clone()
    }

    /// Number of successful creates, updates and patches.
    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
    ) -> Result<Option<DynamicObject>, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        state.tick();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        Ok(state.objects.get(&key(gvk, nn)).cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        state.tick();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        let prefix = key(gvk, &NamespacedName::default()).0;
        Ok(state
            .objects
            .iter()
            .filter(|((kind, _, _), obj)| *kind == prefix && matches_filter(obj, filter))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        let namespaced = state.check_kind(gvk)?;
        let mut obj = obj.clone();
        if !namespaced {
            obj.metadata.namespace = None;
        } else if obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some("default".to_owned());
        }
        let nn = NamespacedName::of(&obj);
        if state.objects.contains_key(&key(gvk, &nn)) {
            return Err(ClientError::status(
                409,
                "AlreadyExists",
                format!("{}s \"{}\" already exists", gvk.kind.to_lowercase(), nn.name),
            ));
        }
        state.admit("create", &obj)?;
        state.writes += 1;
        Ok(state.insert_new(gvk, obj))
    }

    async fn replace(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        let nn = NamespacedName::of(obj);
        let Some(existing) = state.objects.get(&key(gvk, &nn)).cloned() else {
            return Err(not_found(gvk, &nn));
        };
        state.take_conflict()?;
        State::check_version(&existing, obj)?;
        let mut updated = object::with_types(obj.clone(), gvk);
        updated.metadata.uid = existing.metadata.uid.clone();
        updated.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
        state.admit("update", &updated)?;
        state.writes += 1;
        Ok(state.store_update(gvk, updated))
    }

    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        let Some(existing) = state.objects.get(&key(gvk, nn)).cloned() else {
            return Err(not_found(gvk, nn));
        };
        state.take_conflict()?;
        let mut tree = object::to_value(&existing);
        object::apply_merge_patch(&mut tree, patch);
        let mut updated = object::from_value(tree)?;
        updated.metadata.uid = existing.metadata.uid.clone();
        state.admit("update", &updated)?;
        state.writes += 1;
        Ok(state.store_update(gvk, updated))
    }

    async fn replace_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        let nn = NamespacedName::of(obj);
        let Some(mut updated) = state.objects.get(&key(gvk, &nn)).cloned() else {
            return Err(not_found(gvk, &nn));
        };
        state.take_conflict()?;
        State::check_version(&updated, obj)?;
        if !updated.data.is_object() {
            updated.data = Value::Object(Default::default());
        }
        if let Some(fields) = updated.data.as_object_mut() {
            match obj.data.get("status") {
                Some(status) => fields.insert("status".to_owned(), status.clone()),
                None => fields.remove("status"),
            };
        }
        state.writes += 1;
        Ok(state.store_update(gvk, updated))
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        patch: &Value,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        let Some(existing) = state.objects.get(&key(gvk, nn)).cloned() else {
            return Err(not_found(gvk, nn));
        };
        state.take_conflict()?;
        let mut tree = object::to_value(&existing);
        if let Some(status) = patch.get("status") {
            object::apply_merge_patch(&mut tree, &serde_json::json!({ "status": status }));
        }
        let updated = object::from_value(tree)?;
        state.writes += 1;
        Ok(state.store_update(gvk, updated))
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        nn: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let mut state = self.state();
        state.check_kind(gvk)?;
        state.delete(gvk, nn, opts)
    }

    async fn delete_collection(
        &self,
        gvk: &GroupVersionKind,
        filter: &ListFilter,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let matching = self.list(gvk, filter).await?;
        let mut state = self.state();
        for obj in matching {
            state.delete(gvk, &NamespacedName::of(&obj), opts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gvk;
    use serde_json::json;

    fn cluster() -> FakeCluster {
        FakeCluster::with_kinds([(gvk::config_map(), true), (gvk::namespace(), false)])
    }

    fn settings() -> NamespacedName {
        NamespacedName::namespaced("apps", "settings")
    }

    #[tokio::test]
    async fn assigns_identity_on_create_and_bumps_version_on_update() {
        let cluster = cluster();
        let created = cluster
            .create(&gvk::config_map(), &object::minimal(&gvk::config_map(), &settings()))
            .await
            .unwrap();
        assert_eq!(created.metadata.uid.as_deref(), Some("uid-1"));
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

        let patched = cluster
            .patch_merge(&gvk::config_map(), &settings(), &json!({"data": {"a": "b"}}))
            .await
            .unwrap();
        assert_eq!(patched.metadata.uid.as_deref(), Some("uid-1"));
        assert_eq!(patched.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(patched.data["data"], json!({"a": "b"}));
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let cluster = cluster();
        let mut stale = cluster.seed(&gvk::config_map(), object::minimal(&gvk::config_map(), &settings()));
        cluster
            .patch_merge(&gvk::config_map(), &settings(), &json!({"data": {"a": "b"}}))
            .await
            .unwrap();
        stale.data = json!({"data": {"a": "c"}});
        let err = cluster.replace(&gvk::config_map(), &stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn status_writes_only_touch_status() {
        let cluster = cluster();
        let mut obj = object::minimal(&gvk::config_map(), &settings());
        obj.data = json!({"data": {"a": "b"}, "status": {"phase": "Ready"}});
        let mut sent = cluster.seed(&gvk::config_map(), obj);
        sent.data = json!({"data": {"a": "changed"}, "status": {"phase": "Degraded"}});
        let updated = cluster.replace_status(&gvk::config_map(), &sent).await.unwrap();
        assert_eq!(updated.data, json!({"data": {"a": "b"}, "status": {"phase": "Degraded"}}));

        // The version sent above is stale now.
        assert!(cluster
            .replace_status(&gvk::config_map(), &sent)
            .await
            .unwrap_err()
            .is_conflict());

        let patched = cluster
            .patch_status(
                &gvk::config_map(),
                &settings(),
                &json!({"data": {"a": "c"}, "status": {"conditions": []}}),
            )
            .await
            .unwrap();
        assert_eq!(
            patched.data,
            json!({"data": {"a": "b"}, "status": {"phase": "Degraded", "conditions": []}})
        );
    }

    #[tokio::test]
    async fn finalizers_hold_deletion() {
        let cluster = cluster();
        let mut obj = object::minimal(&gvk::config_map(), &settings());
        obj.metadata.finalizers = Some(vec!["example.com/hold".to_owned()]);
        cluster.seed(&gvk::config_map(), obj);

        cluster
            .delete(&gvk::config_map(), &settings(), &DeleteOptions::default())
            .await
            .unwrap();
        let held = cluster.stored(&gvk::config_map(), &settings()).unwrap();
        assert!(held.metadata.deletion_timestamp.is_some());

        cluster
            .patch_merge(&gvk::config_map(), &settings(), &json!({"metadata": {"finalizers": []}}))
            .await
            .unwrap();
        assert!(cluster.stored(&gvk::config_map(), &settings()).is_none());
    }

    #[tokio::test]
    async fn unknown_kinds_do_not_match() {
        let widget = GroupVersionKind::gvk("example.com", "v1", "Widget");
        let err = cluster()
            .get(&widget, &NamespacedName::namespaced("apps", "w1"))
            .await
            .unwrap_err();
        assert!(err.is_no_match());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let cluster = cluster();
        for (ns, name, app) in [("apps", "a", "x"), ("apps", "b", "y"), ("other", "c", "x")] {
            let mut obj = object::minimal(&gvk::config_map(), &NamespacedName::namespaced(ns, name));
            obj.metadata.labels = Some(BTreeMap::from_iter([("app".to_owned(), app.to_owned())]));
            cluster.seed(&gvk::config_map(), obj);
        }
        let filter = ListFilter {
            namespace: Some("apps".to_owned()),
            label_selector: Some("app=x".to_owned()),
            field_selector: None,
        };
        let found = cluster.list(&gvk::config_map(), &filter).await.unwrap();
        let names: Vec<_> = found.iter().map(|o| o.name_any()).collect();
        assert_eq!(names, vec!["a"]);
    }
}
