//! Mutations applied to an object before it is written.
use std::{fmt, sync::Arc};

use anyhow::Context as _;
use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::Value;

use crate::{object, path::Path};

type MutateFn = dyn Fn(&mut DynamicObject) -> anyhow::Result<()> + Send + Sync;

/// A named transformation of an object.
///
/// Mutations operate on the whole object tree, so they can address metadata as
/// well as the body, e.g. `.metadata.finalizers` or `.spec.x`.
#[derive(Clone)]
pub struct Mutation {
    name: String,
    f: Arc<MutateFn>,
}

impl Mutation {
    /// Wrap an arbitrary function.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut DynamicObject) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// The mutation that changes nothing.
    pub fn identity() -> Self {
        Self::new("identity", |_| Ok(()))
    }

    /// Apply the mutation to an object.
    pub fn apply(&self, obj: &mut DynamicObject) -> anyhow::Result<()> {
        (self.f)(obj).with_context(|| format!("mutation {}", self.name))
    }

    /// Human readable description.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply `self` and then `next`.
    pub fn then(self, next: Mutation) -> Self {
        pipeline([self, next])
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mutation").field(&self.name).finish()
    }
}

/// Run mutations in order, stopping at the first failure.
pub fn pipeline(mutations: impl IntoIterator<Item = Mutation>) -> Mutation {
    let mutations: Vec<Mutation> = mutations.into_iter().collect();
    let name = mutations
        .iter()
        .map(Mutation::name)
        .collect::<Vec<_>>()
        .join(" | ");
    Mutation::new(name, move |obj| {
        mutations.iter().try_for_each(|m| m.apply(obj))
    })
}

// Round trip the object through its JSON tree so paths reach metadata too.
fn edit_tree(
    obj: &mut DynamicObject,
    f: impl FnOnce(&mut Value) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut tree = object::to_value(obj);
    f(&mut tree)?;
    *obj = object::from_value(tree)?;
    Ok(())
}

/// Set the value at `path`, creating intermediate objects.
///
/// An unparsable path or unserializable value yields a mutation that fails when
/// applied, which the lifecycle operations report without retrying.
pub fn set(path: &str, value: impl Serialize) -> Mutation {
    let prepared = path
        .parse::<Path>()
        .map_err(anyhow::Error::from)
        .and_then(|parsed| Ok((parsed, serde_json::to_value(value)?)));
    match prepared {
        Ok((parsed, value)) => Mutation::new(format!("{parsed} = {value}"), move |obj| {
            edit_tree(obj, |tree| parsed.set(tree, value.clone()))
        }),
        Err(err) => invalid(path, err),
    }
}

/// Remove the value at `path` if it is present.
pub fn remove(path: &str) -> Mutation {
    match path.parse::<Path>() {
        Ok(parsed) => Mutation::new(format!("del({parsed})"), move |obj| {
            edit_tree(obj, |tree| {
                parsed.remove(tree);
                Ok(())
            })
        }),
        Err(err) => invalid(path, err.into()),
    }
}

fn invalid(path: &str, err: anyhow::Error) -> Mutation {
    let message = format!("{err:#}");
    Mutation::new(format!("invalid({path})"), move |_| {
        Err(anyhow::anyhow!(message.clone()))
    })
}

/// Merge `patch` into the object as an RFC 7386 merge patch.
pub fn merge(patch: Value) -> Mutation {
    Mutation::new(format!(". * {patch}"), move |obj| {
        edit_tree(obj, |tree| {
            object::apply_merge_patch(tree, &patch);
            Ok(())
        })
    })
}

/// Replace the `.spec` of the object with a serialized typed spec.
pub fn spec_from<S: Serialize>(spec: &S) -> Mutation {
    set(".spec", spec)
}

/// Add or overwrite one label.
pub fn label(key: impl Into<String>, value: impl Into<String>) -> Mutation {
    let (key, value) = (key.into(), value.into());
    Mutation::new(format!(".metadata.labels[{key}] = {value}"), move |obj| {
        obj.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(key.clone(), value.clone());
        Ok(())
    })
}

/// Clear all finalizers so deletion is not blocked.
pub fn clear_finalizers() -> Mutation {
    Mutation::new(".metadata.finalizers = []", |obj| {
        obj.metadata.finalizers = Some(vec![]);
        Ok(())
    })
}
