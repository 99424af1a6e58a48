//! The dynamically typed object model the harness operates on.
//!
//! Objects fetched from the cluster are [`DynamicObject`]s: typed metadata plus an
//! untyped JSON body. Projections into typed resources are fallible and never
//! assume a field is present.
use std::fmt;

use kube::{
    api::{ApiResource, DynamicObject, TypeMeta},
    core::GroupVersionKind,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Identity of a resource within its kind.
///
/// Cluster scoped resources have no namespace. List and bulk operations may leave
/// the name empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    /// Namespace, if the resource is namespaced.
    pub namespace: Option<String>,
    /// Name of the resource.
    pub name: String,
}

impl NamespacedName {
    /// Identity of a cluster scoped resource.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Identity of a namespaced resource.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Identity of an object.
    pub fn of(obj: &impl Resource) -> Self {
        Self {
            namespace: obj.meta().namespace.clone(),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => write!(f, "{}/{}", ns, self.name),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// The UID and resource version that together identify one incarnation of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incarnation {
    /// Server assigned UID, unique per incarnation.
    pub uid: Option<String>,
    /// Version token used for optimistic concurrency.
    pub resource_version: Option<String>,
}

impl Incarnation {
    /// Capture the identity of an object.
    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            uid: obj.metadata.uid.clone(),
            resource_version: obj.metadata.resource_version.clone(),
        }
    }
}

/// Construct an object carrying only its type and identity.
pub fn minimal(gvk: &GroupVersionKind, nn: &NamespacedName) -> DynamicObject {
    let mut obj = DynamicObject::new(&nn.name, &ApiResource::from_gvk(gvk));
    obj.metadata.namespace = nn.namespace.clone();
    obj
}

/// Convert a typed resource into a dynamic object.
pub fn to_dynamic<K>(obj: &K) -> Result<(GroupVersionKind, DynamicObject)>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
    let id = NamespacedName::of(obj).to_string();
    let projection_err = |source| Error::Projection {
        kind: gvk.kind.clone(),
        id: id.clone(),
        target: "DynamicObject",
        source,
    };
    let mut value = serde_json::to_value(obj).map_err(projection_err)?;
    // Typed resources do not always serialize their TypeMeta.
    if let Some(fields) = value.as_object_mut() {
        fields.insert("apiVersion".to_owned(), Value::String(gvk.api_version()));
        fields.insert("kind".to_owned(), Value::String(gvk.kind.clone()));
    }
    let dynamic = serde_json::from_value(value).map_err(projection_err)?;
    Ok((gvk, dynamic))
}

/// Project a dynamic object into a typed resource.
pub fn project<K>(obj: &DynamicObject) -> Result<K>
where
    K: DeserializeOwned,
{
    let projection_err = |source| Error::Projection {
        kind: kind_of(obj),
        id: NamespacedName::of(obj).to_string(),
        target: std::any::type_name::<K>(),
        source,
    };
    let value = serde_json::to_value(obj).map_err(projection_err)?;
    serde_json::from_value(value).map_err(projection_err)
}

/// The whole object, metadata included, as one JSON tree.
///
/// Conditions and mutations address paths like `.metadata.labels` and
/// `.status.phase` in this tree.
pub fn to_value(obj: &DynamicObject) -> Value {
    // Serializing ObjectMeta and a JSON body cannot fail.
    serde_json::to_value(obj).unwrap_or(Value::Null)
}

/// Rebuild an object from a JSON tree produced by [`to_value`].
pub fn from_value(value: Value) -> Result<DynamicObject, serde_json::Error> {
    serde_json::from_value(value)
}

/// The kind of an object, or an empty string when it carries no type information.
pub fn kind_of(obj: &DynamicObject) -> String {
    obj.types
        .as_ref()
        .map(|types| types.kind.clone())
        .unwrap_or_default()
}

/// Ensure the object carries type information for the given kind.
pub fn with_types(mut obj: DynamicObject, gvk: &GroupVersionKind) -> DynamicObject {
    obj.types = Some(TypeMeta {
        api_version: gvk.api_version(),
        kind: gvk.kind.clone(),
    });
    obj
}

/// Overlay the desired state of `desired` onto `existing`.
///
/// Labels and annotations are merged key by key, the body is merged as a JSON merge
/// patch, and server owned metadata of `existing` is preserved.
pub fn overlay(existing: &DynamicObject, desired: &DynamicObject) -> DynamicObject {
    let mut merged = existing.clone();
    if let Some(labels) = &desired.metadata.labels {
        merged.labels_mut().extend(labels.clone());
    }
    if let Some(annotations) = &desired.metadata.annotations {
        merged.annotations_mut().extend(annotations.clone());
    }
    if desired.metadata.owner_references.is_some() {
        merged.metadata.owner_references = desired.metadata.owner_references.clone();
    }
    apply_merge_patch(&mut merged.data, &desired.data);
    merged
}

/// Apply an RFC 7386 JSON merge patch in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_fields) = target {
        for (key, value) in patch_fields {
            if value.is_null() {
                target_fields.remove(key);
            } else {
                apply_merge_patch(
                    target_fields.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Compute the RFC 7386 JSON merge patch that turns `original` into `modified`.
///
/// Returns `None` when the documents are equal. Arrays are replaced wholesale.
pub fn merge_patch_diff(original: &Value, modified: &Value) -> Option<Value> {
    if original == modified {
        return None;
    }
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) => {
                        if let Some(change) = merge_patch_diff(old, new) {
                            patch.insert(key.clone(), change);
                        }
                    }
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(modified.clone()),
    }
}

/// Drop fields the server owns so the object can be sent in a create request.
pub fn strip_server_fields(mut obj: DynamicObject) -> DynamicObject {
    obj.metadata.uid = None;
    obj.metadata.resource_version = None;
    obj.metadata.creation_timestamp = None;
    obj.metadata.deletion_timestamp = None;
    obj.metadata.generation = None;
    obj.metadata.managed_fields = None;
    if let Some(body) = obj.data.as_object_mut() {
        body.remove("status");
    }
    obj
}
