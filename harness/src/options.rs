//! Per-operation descriptors and their builders.
use std::{fmt, sync::Arc, time::Duration};

use kube::{api::DynamicObject, core::GroupVersionKind, Resource};
use serde::Serialize;

use crate::{
    client::{DeleteOptions, ListFilter, Propagation},
    condition::{Condition, ErrorPredicate},
    error::ClientError,
    object::{self, NamespacedName},
    retry::{Diagnostics, Polling, Timeouts},
    transform::Mutation,
};

/// Where the object an operation writes or compares comes from.
#[derive(Clone, Debug)]
pub enum ObjectSource {
    /// A complete object to create.
    ToCreate(DynamicObject),
    /// The object currently stored in the cluster.
    Fetched,
    /// An object carrying only type and identity.
    Minimal,
}

/// A named predicate marking an error as expected.
#[derive(Clone)]
pub struct AcceptableErr {
    name: String,
    pred: ErrorPredicate,
}

impl AcceptableErr {
    /// Wrap a predicate.
    pub fn new(
        name: impl Into<String>,
        pred: impl Fn(&ClientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            pred: Arc::new(pred),
        }
    }

    /// Whether `err` is expected.
    pub fn accepts(&self, err: &ClientError) -> bool {
        (self.pred)(err)
    }

    /// Name of the predicate.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for AcceptableErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AcceptableErr").field(&self.name).finish()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct TimingOverrides {
    eventually_timeout: Option<Duration>,
    eventually_poll_interval: Option<Duration>,
    consistently_duration: Option<Duration>,
    consistently_poll_interval: Option<Duration>,
}

/// Describes one resource operation: what to act on, how to change it, and what
/// must hold afterwards.
///
/// Built fresh for every call and consumed by exactly one operation. Builders are
/// plain field assignments; setting the same field twice keeps the last value.
#[derive(Clone, Debug)]
pub struct ResourceOptions {
    pub(crate) gvk: GroupVersionKind,
    pub(crate) nn: NamespacedName,
    pub(crate) source: Option<ObjectSource>,
    pub(crate) list_filter: ListFilter,
    pub(crate) delete_options: DeleteOptions,
    pub(crate) mutate: Option<Mutation>,
    pub(crate) condition: Option<Condition>,
    pub(crate) ignore_not_found: bool,
    pub(crate) acceptable_err: Option<AcceptableErr>,
    pub(crate) wait_for_deletion: bool,
    pub(crate) wait_for_recreation: bool,
    pub(crate) remove_finalizers_on_delete: bool,
    pub(crate) custom_error_msg: Option<String>,
    pub(crate) field_name: Option<String>,
    pub(crate) invalid_value: Option<String>,
    timing: TimingOverrides,
    // Set when a constructor could not build its object.
    invalid: Option<String>,
}

impl ResourceOptions {
    fn base(gvk: GroupVersionKind, nn: NamespacedName) -> Self {
        Self {
            gvk,
            nn,
            source: None,
            list_filter: ListFilter::default(),
            delete_options: DeleteOptions::default(),
            mutate: None,
            condition: None,
            ignore_not_found: true,
            acceptable_err: None,
            wait_for_deletion: false,
            wait_for_recreation: false,
            remove_finalizers_on_delete: false,
            custom_error_msg: None,
            field_name: None,
            invalid_value: None,
            timing: TimingOverrides::default(),
            invalid: None,
        }
    }

    /// Every resource of a kind, for list and bulk operations.
    pub fn kind(gvk: GroupVersionKind) -> Self {
        Self::base(gvk, NamespacedName::default())
    }

    /// One resource identified by kind and name.
    pub fn named(gvk: GroupVersionKind, nn: NamespacedName) -> Self {
        Self::base(gvk, nn)
    }

    /// Create the given typed object.
    pub fn to_create<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        match object::to_dynamic(obj) {
            Ok((gvk, dynamic)) => Self::to_create_dynamic(gvk, dynamic),
            Err(err) => {
                let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
                let mut opts = Self::base(gvk, NamespacedName::of(obj));
                opts.invalid = Some(err.to_string());
                opts
            }
        }
    }

    /// Create the given dynamic object as `gvk`.
    pub fn to_create_dynamic(gvk: GroupVersionKind, obj: DynamicObject) -> Self {
        let nn = NamespacedName::of(&obj);
        let obj = object::with_types(obj, &gvk);
        let mut opts = Self::base(gvk, nn);
        opts.source = Some(ObjectSource::ToCreate(obj));
        opts
    }

    /// Operate on the object currently stored in the cluster.
    pub fn fetched(gvk: GroupVersionKind, nn: NamespacedName) -> Self {
        let mut opts = Self::base(gvk, nn);
        opts.source = Some(ObjectSource::Fetched);
        opts
    }

    /// Operate on an object carrying only type and identity, typically combined
    /// with a mutation that fills in the rest.
    pub fn minimal(gvk: GroupVersionKind, nn: NamespacedName) -> Self {
        let mut opts = Self::base(gvk, nn);
        opts.source = Some(ObjectSource::Minimal);
        opts
    }

    /// Replace the list filter.
    pub fn list_filter(mut self, filter: ListFilter) -> Self {
        self.list_filter = filter;
        self
    }

    /// Only list resources in `namespace`.
    pub fn namespace_filter(mut self, namespace: impl Into<String>) -> Self {
        self.list_filter.namespace = Some(namespace.into());
        self
    }

    /// Only list resources matching a label selector.
    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.list_filter.label_selector = Some(selector.into());
        self
    }

    /// Only list resources matching a field selector.
    pub fn field_selector(mut self, selector: impl Into<String>) -> Self {
        self.list_filter.field_selector = Some(selector.into());
        self
    }

    /// Replace the delete options.
    pub fn delete_options(mut self, opts: DeleteOptions) -> Self {
        self.delete_options = opts;
        self
    }

    /// Set the propagation policy of delete calls.
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.delete_options.propagation = Some(propagation);
        self
    }

    /// Set the grace period of delete calls.
    pub fn grace_period(mut self, seconds: u32) -> Self {
        self.delete_options.grace_period = Some(seconds);
        self
    }

    /// Whether a missing resource is tolerated. Defaults to `true`.
    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }

    /// Wait for the resource to disappear after deleting it.
    pub fn wait_for_deletion(mut self, wait: bool) -> Self {
        self.wait_for_deletion = wait;
        self
    }

    /// Wait for the resource to be recreated after deleting it.
    pub fn wait_for_recreation(mut self, wait: bool) -> Self {
        self.wait_for_recreation = wait;
        self
    }

    /// Clear finalizers before deleting.
    pub fn remove_finalizers_on_delete(mut self, remove: bool) -> Self {
        self.remove_finalizers_on_delete = remove;
        self
    }

    /// Mutation applied before writing.
    pub fn mutate(mut self, mutation: Mutation) -> Self {
        self.mutate = Some(mutation);
        self
    }

    /// Condition that must hold. Replaces any earlier condition; combine with
    /// [`Condition::and`] instead.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Treat errors accepted by `pred` as success.
    pub fn acceptable_err(
        mut self,
        name: impl Into<String>,
        pred: impl Fn(&ClientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.acceptable_err = Some(AcceptableErr::new(name, pred));
        self
    }

    /// Replace the default failure description.
    pub fn custom_error_msg(mut self, msg: impl Into<String>) -> Self {
        self.custom_error_msg = Some(msg.into());
        self
    }

    /// Field a webhook rejection message must mention.
    pub fn field_name(mut self, field: impl Into<String>) -> Self {
        self.field_name = Some(field.into());
        self
    }

    /// Value a webhook rejection message must mention.
    pub fn invalid_value(mut self, value: impl Into<String>) -> Self {
        self.invalid_value = Some(value.into());
        self
    }

    /// Override the eventually timeout for this operation.
    pub fn eventually_timeout(mut self, timeout: Duration) -> Self {
        self.timing.eventually_timeout = Some(timeout);
        self
    }

    /// Override the eventually poll interval for this operation.
    pub fn eventually_polling_interval(mut self, interval: Duration) -> Self {
        self.timing.eventually_poll_interval = Some(interval);
        self
    }

    /// Override the consistently duration for this operation.
    pub fn consistently_duration(mut self, duration: Duration) -> Self {
        self.timing.consistently_duration = Some(duration);
        self
    }

    /// Override the consistently poll interval for this operation.
    pub fn consistently_polling_interval(mut self, interval: Duration) -> Self {
        self.timing.consistently_poll_interval = Some(interval);
        self
    }

    /// Kind targeted by the operation.
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Identity rendered as `namespace/name`, or `name` when cluster scoped.
    pub fn resource_id(&self) -> String {
        self.nn.to_string()
    }

    /// The object source, if one was chosen.
    pub fn source(&self) -> Option<&ObjectSource> {
        self.source.as_ref()
    }

    /// Options for a nested check on the same resource, keeping timing overrides.
    pub(crate) fn probe(&self, msg: impl Into<String>) -> Self {
        let mut probe = Self::base(self.gvk.clone(), self.nn.clone());
        probe.timing = self.timing;
        probe.custom_error_msg = Some(msg.into());
        probe
    }

    pub(crate) fn eventually(&self, base: &Timeouts) -> Polling {
        let base = base.eventually();
        Polling {
            timeout: self.timing.eventually_timeout.unwrap_or(base.timeout),
            interval: self.timing.eventually_poll_interval.unwrap_or(base.interval),
        }
    }

    pub(crate) fn consistently(&self, base: &Timeouts) -> Polling {
        let base = base.consistently();
        Polling {
            timeout: self.timing.consistently_duration.unwrap_or(base.timeout),
            interval: self.timing.consistently_poll_interval.unwrap_or(base.interval),
        }
    }

    /// Diagnostics for a loop over this resource, using `default_msg` unless a
    /// custom message was given.
    pub(crate) fn diagnostics(&self, default_msg: &str) -> Diagnostics {
        Diagnostics::new(
            self.gvk.kind.clone(),
            self.resource_id(),
            self.custom_error_msg
                .clone()
                .unwrap_or_else(|| default_msg.to_owned()),
        )
    }

    /// Report construction problems before any I/O happens.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if let Some(reason) = &self.invalid {
            return Err(format!("{} '{}': {reason}", self.gvk.kind, self.resource_id()));
        }
        if let Some(condition) = &self.condition {
            condition.validate()?;
        }
        Ok(())
    }

    /// Whether an error is accepted by the caller supplied predicate.
    pub(crate) fn accepts(&self, err: &ClientError) -> bool {
        self.acceptable_err
            .as_ref()
            .map_or(false, |acceptable| acceptable.accepts(err))
    }
}
