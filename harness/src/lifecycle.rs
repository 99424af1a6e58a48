//! Lifecycle operations: existence and absence checks, writes, reads and deletion.
//!
//! Every operation consumes a [`ResourceOptions`] and waits until the cluster
//! reaches the described state, the deadline elapses, or an error that retrying
//! cannot fix occurs. A missing resource is a retryable state for existence checks
//! and a success for deletion checks.
use kube::{api::DynamicObject, core::GroupVersionKind, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::{
    condition::{Comparison, Condition, Subject},
    context::TestContext,
    error::{ClientError, Error, Result},
    object::{self, Incarnation},
    options::{ObjectSource, ResourceOptions},
    retry::{self, Attempt},
    transform,
};

/// Attempts a write gets within one poll iteration when it keeps losing
/// optimistic concurrency races.
const MAX_CONFLICT_RETRIES: usize = 5;

/// Outcome of a cleanup step whose failure does not fail the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BestEffort {
    /// The cleanup was performed.
    Done,
    /// There was nothing to clean up.
    Skipped(String),
    /// The cleanup failed.
    Failed(String),
}

impl BestEffort {
    fn log(&self, step: &str) {
        match self {
            BestEffort::Done => debug!(step, "cleanup done"),
            BestEffort::Skipped(reason) => debug!(step, %reason, "cleanup skipped"),
            BestEffort::Failed(reason) => warn!(step, %reason, "cleanup failed, continuing"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Write {
    Create,
    Update,
    Patch,
    CreateOrUpdate,
    CreateOrPatch,
}

impl Write {
    fn verb(self) -> &'static str {
        match self {
            Write::Create => "create",
            Write::Update => "update",
            Write::Patch => "patch",
            Write::CreateOrUpdate => "create or update",
            Write::CreateOrPatch => "create or patch",
        }
    }

    fn creates(self) -> bool {
        matches!(self, Write::Create | Write::CreateOrUpdate | Write::CreateOrPatch)
    }

    fn patches(self) -> bool {
        matches!(self, Write::Patch | Write::CreateOrPatch)
    }
}

/// The object a write starts from, resolved once per operation.
struct Template {
    obj: DynamicObject,
    // Merge the template over the stored object when it already exists.
    overlay: bool,
}

/// A write attempt: the object that was sent and what the server answered.
type Written = (DynamicObject, Result<DynamicObject, ClientError>);

pub(crate) fn client_error(opts: &ResourceOptions, source: ClientError) -> Error {
    Error::Client {
        kind: opts.gvk.kind.clone(),
        id: opts.resource_id(),
        source,
    }
}

pub(crate) fn not_found(opts: &ResourceOptions) -> ClientError {
    ClientError::status(
        404,
        "NotFound",
        format!("{} '{}' not found", opts.gvk.kind, opts.resource_id()),
    )
}

// Reads that failed: an unregistered kind never resolves by waiting.
pub(crate) fn read_failure(opts: &ResourceOptions, err: ClientError) -> Attempt {
    if err.is_no_match() {
        Attempt::Fatal(client_error(opts, err))
    } else {
        Attempt::Retry(format!("failed to read: {err}"))
    }
}

pub(crate) fn check(opts: &ResourceOptions) -> Result<()> {
    opts.validate().map_err(Error::Precondition)
}

pub(crate) fn mutate(opts: &ResourceOptions, obj: &mut DynamicObject) -> Result<()> {
    if let Some(mutation) = &opts.mutate {
        mutation.apply(obj).map_err(|source| Error::Mutation {
            kind: opts.gvk.kind.clone(),
            id: opts.resource_id(),
            source,
        })?;
    }
    Ok(())
}

fn names(items: &[DynamicObject]) -> String {
    items
        .iter()
        .map(|obj| object::NamespacedName::of(obj).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TestContext {
    // One read of the resource against its condition.
    pub(crate) async fn exists_attempt(
        &self,
        opts: &ResourceOptions,
    ) -> Result<DynamicObject, Attempt> {
        let obj = match self.client.get(&opts.gvk, &opts.nn).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return Err(Attempt::Retry("resource not found".to_owned())),
            Err(err) => return Err(read_failure(opts, err)),
        };
        if let Some(condition) = &opts.condition {
            condition
                .evaluate(&Subject::object(&obj))
                .map_err(|m| Attempt::Retry(format!("condition {condition} not met: {m}")))?;
        }
        Ok(obj)
    }

    /// Wait until the resource exists and satisfies the condition, if any.
    ///
    /// An unregistered kind fails immediately.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_exists(&self, opts: ResourceOptions) -> Result<DynamicObject> {
        check(&opts)?;
        let diag = opts.diagnostics("resource was not found or did not satisfy its condition");
        let opts = &opts;
        let obj = retry::eventually(opts.eventually(&self.timeouts), &diag, move || {
            self.exists_attempt(opts)
        })
        .await?;
        debug!("resource exists");
        Ok(obj)
    }

    /// Require the resource to exist and satisfy the condition for the whole
    /// consistently duration.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_exists_consistently(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        check(&opts)?;
        let diag = opts.diagnostics("resource did not consistently exist");
        let opts = &opts;
        retry::consistently(opts.consistently(&self.timeouts), &diag, move || {
            self.exists_attempt(opts)
        })
        .await
    }

    /// Wait until listing the kind returns at least one resource and the list
    /// satisfies the condition, if any.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind))]
    pub async fn ensure_resources_exist(&self, opts: ResourceOptions) -> Result<Vec<DynamicObject>> {
        check(&opts)?;
        let diag = opts.diagnostics("no matching resources were found");
        let opts = &opts;
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            let items = self
                .client
                .list(&opts.gvk, &opts.list_filter)
                .await
                .map_err(|err| read_failure(opts, err))?;
            if let Some(condition) = &opts.condition {
                condition
                    .evaluate(&Subject::list(&items))
                    .map_err(|m| Attempt::Retry(format!("condition {condition} not met: {m}")))?;
            }
            if items.is_empty() {
                return Err(Attempt::Retry("no resources found".to_owned()));
            }
            Ok(items)
        })
        .await
    }

    /// Check once that the resource does not exist.
    ///
    /// An unregistered kind counts as absent.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_does_not_exist(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        match self.client.get(&opts.gvk, &opts.nn).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(Error::Assertion(format!(
                "{}: {} '{}' exists but was expected to be absent",
                opts.custom_error_msg
                    .as_deref()
                    .unwrap_or("unexpected resource"),
                opts.gvk.kind,
                opts.resource_id()
            ))),
            Err(err) if err.is_no_match() => {
                warn!(%err, "kind is not registered, treating resource as absent");
                Ok(())
            }
            Err(err) if opts.accepts(&err) => Ok(()),
            Err(err) => Err(client_error(&opts, err)),
        }
    }

    /// Wait until the resource no longer exists.
    ///
    /// An unregistered kind counts as absent.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_gone(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        let diag = opts.diagnostics("resource still exists");
        let opts = &opts;
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(None) => Ok(()),
                Ok(Some(obj)) if obj.metadata.deletion_timestamp.is_some() => Err(Attempt::Retry(
                    format!("deletion pending on finalizers {:?}", obj.finalizers()),
                )),
                Ok(Some(_)) => Err(Attempt::Retry("resource still exists".to_owned())),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) if err.is_no_match() => {
                    warn!(%err, "kind is not registered, treating resource as gone");
                    Ok(())
                }
                Err(err) if opts.accepts(&err) => Ok(()),
                Err(err) => Err(Attempt::Retry(format!("failed to read: {err}"))),
            }
        })
        .await?;
        debug!("resource is gone");
        Ok(())
    }

    /// Check once that listing the kind returns nothing.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind))]
    pub async fn ensure_resources_do_not_exist(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        match self.client.list(&opts.gvk, &opts.list_filter).await {
            Ok(items) if items.is_empty() => Ok(()),
            Ok(items) => Err(Error::Assertion(format!(
                "{}: expected no {} resources but found {}: {}",
                opts.custom_error_msg
                    .as_deref()
                    .unwrap_or("unexpected resources"),
                opts.gvk.kind,
                items.len(),
                names(&items)
            ))),
            Err(err) if err.is_no_match() || err.is_not_found() => {
                warn!(%err, "kind is not registered, treating resources as absent");
                Ok(())
            }
            Err(err) if opts.accepts(&err) => Ok(()),
            Err(err) => Err(client_error(&opts, err)),
        }
    }

    /// Wait until listing the kind returns nothing.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind))]
    pub async fn ensure_resources_gone(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        let diag = opts.diagnostics("resources still exist");
        let opts = &opts;
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            match self.client.list(&opts.gvk, &opts.list_filter).await {
                Ok(items) if items.is_empty() => Ok(()),
                Ok(items) => Err(Attempt::Retry(format!(
                    "{} resources still exist: {}",
                    items.len(),
                    names(&items)
                ))),
                Err(err) if err.is_no_match() || err.is_not_found() => Ok(()),
                Err(err) if opts.accepts(&err) => Ok(()),
                Err(err) => Err(Attempt::Retry(format!("failed to list: {err}"))),
            }
        })
        .await
    }

    async fn resolve(&self, opts: &ResourceOptions, write: Write) -> Result<Template> {
        match &opts.source {
            Some(ObjectSource::ToCreate(obj)) => Ok(Template {
                obj: obj.clone(),
                overlay: true,
            }),
            Some(ObjectSource::Fetched) => {
                let probe = opts.probe("resource to write was not found");
                let obj = self.ensure_resource_exists(probe).await?;
                Ok(Template {
                    obj,
                    overlay: false,
                })
            }
            Some(ObjectSource::Minimal) => Ok(Template {
                obj: object::minimal(&opts.gvk, &opts.nn),
                overlay: false,
            }),
            None if !write.creates() => Ok(Template {
                obj: object::minimal(&opts.gvk, &opts.nn),
                overlay: false,
            }),
            None => Err(Error::Precondition(format!(
                "{} '{}': {} needs an object, use ResourceOptions::to_create, fetched or minimal",
                opts.gvk.kind,
                opts.resource_id(),
                write.verb()
            ))),
        }
    }

    // One write against the current state of the cluster.
    async fn write_step(
        &self,
        opts: &ResourceOptions,
        template: &Template,
        write: Write,
    ) -> Result<Written> {
        let existing = if write == Write::Create {
            None
        } else {
            match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(found) => found,
                Err(err) => return Ok((template.obj.clone(), Err(err))),
            }
        };
        let Some(existing) = existing else {
            if !write.creates() {
                return Ok((template.obj.clone(), Err(not_found(opts))));
            }
            let mut obj = template.obj.clone();
            mutate(opts, &mut obj)?;
            let obj = object::strip_server_fields(obj);
            let outcome = self.client.create(&opts.gvk, &obj).await;
            return Ok((obj, outcome));
        };

        let mut desired = if template.overlay {
            object::overlay(&existing, &template.obj)
        } else {
            existing.clone()
        };
        mutate(opts, &mut desired)?;
        let Some(patch) =
            object::merge_patch_diff(&object::to_value(&existing), &object::to_value(&desired))
        else {
            debug!("stored resource already matches, skipping write");
            return Ok((desired, Ok(existing)));
        };
        let outcome = if write.patches() {
            self.client.patch_merge(&opts.gvk, &opts.nn, &patch).await
        } else {
            self.client.replace(&opts.gvk, &desired).await
        };
        Ok((desired, outcome))
    }

    // Retry lost concurrency races within the same poll iteration.
    async fn write_once(
        &self,
        opts: &ResourceOptions,
        template: &Template,
        write: Write,
    ) -> Result<Written> {
        let mut attempt = 1;
        loop {
            let (sent, outcome) = self.write_step(opts, template, write).await?;
            let raced = match &outcome {
                Err(err) => {
                    err.is_conflict() || (write != Write::Create && err.is_already_exists())
                }
                Ok(_) => false,
            };
            if !raced {
                return Ok((sent, outcome));
            }
            match outcome {
                Err(err) if attempt >= MAX_CONFLICT_RETRIES => {
                    return Err(client_error(opts, err));
                }
                Err(err) => debug!(attempt, %err, "write raced, retrying against the latest version"),
                Ok(_) => {}
            }
            attempt += 1;
        }
    }

    // Judge a write against its condition.
    fn judge_write(
        opts: &ResourceOptions,
        condition: &Condition,
        (sent, outcome): Written,
    ) -> Result<DynamicObject, Attempt> {
        match outcome {
            Err(err) if opts.accepts(&err) => {
                debug!(%err, "write failed with an accepted error");
                Ok(sent)
            }
            Err(err) if err.is_no_match() && !condition.expects_failure() => {
                Err(Attempt::Fatal(client_error(opts, err)))
            }
            outcome => {
                condition
                    .evaluate(&Subject::write(&outcome))
                    .map_err(|m| Attempt::Retry(format!("condition {condition} not met: {m}")))?;
                Ok(outcome.unwrap_or(sent))
            }
        }
    }

    async fn eventually_applied(
        &self,
        opts: &ResourceOptions,
        template: &Template,
        condition: &Condition,
        write: Write,
    ) -> Result<DynamicObject> {
        let diag = opts.diagnostics(&format!("failed to {} resource", write.verb()));
        let obj = retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            let written = self.write_once(opts, template, write).await?;
            Self::judge_write(opts, condition, written)
        })
        .await?;
        info!(verb = write.verb(), "resource written");
        Ok(obj)
    }

    async fn apply(&self, opts: ResourceOptions, write: Write) -> Result<DynamicObject> {
        check(&opts)?;
        let template = self.resolve(&opts, write).await?;
        let condition = opts
            .condition
            .clone()
            .unwrap_or(Condition::Succeed)
            .for_write();
        self.eventually_applied(&opts, &template, &condition, write)
            .await
    }

    async fn apply_consistently(&self, opts: ResourceOptions, write: Write) -> Result<DynamicObject> {
        check(&opts)?;
        let condition = opts.condition.clone().unwrap_or(Condition::Succeed);
        if condition.expects_failure() {
            return Err(Error::Precondition(format!(
                "{} '{}': condition {condition} expects the write to fail and cannot hold consistently",
                opts.gvk.kind,
                opts.resource_id()
            )));
        }
        let template = self.resolve(&opts, write).await?;
        self.eventually_applied(&opts, &template, &Condition::Succeed, write)
            .await?;

        let diag = opts.diagnostics("written resource did not consistently satisfy its condition");
        let (opts, condition) = (&opts, &condition);
        retry::consistently(opts.consistently(&self.timeouts), &diag, move || async move {
            let obj = match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(Some(obj)) => obj,
                Ok(None) => return Err(Attempt::Retry("resource disappeared".to_owned())),
                Err(err) => return Err(read_failure(opts, err)),
            };
            condition
                .evaluate(&Subject::object(&obj))
                .map_err(|m| Attempt::Retry(format!("condition {condition} not met: {m}")))?;
            Ok(obj)
        })
        .await
    }

    /// Create the resource, failing while it already exists, then check the
    /// condition against the write outcome.
    ///
    /// When the condition expects the write to fail, the object that was
    /// rejected is returned.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn eventually_resource_created(&self, opts: ResourceOptions) -> Result<DynamicObject> {
        self.apply(opts, Write::Create).await
    }

    /// Apply the mutation to the stored resource and replace it.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn eventually_resource_updated(&self, opts: ResourceOptions) -> Result<DynamicObject> {
        self.apply(opts, Write::Update).await
    }

    /// Apply the mutation to the stored resource and send the difference as a
    /// merge patch.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn eventually_resource_patched(&self, opts: ResourceOptions) -> Result<DynamicObject> {
        self.apply(opts, Write::Patch).await
    }

    /// Create the resource if missing, otherwise merge the object over the stored
    /// one, apply the mutation and replace it.
    ///
    /// Nothing is written when the stored resource already matches, so calling
    /// this twice without a mutation leaves the resource unchanged.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn eventually_resource_created_or_updated(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        self.apply(opts, Write::CreateOrUpdate).await
    }

    /// Like [`eventually_resource_created_or_updated`](Self::eventually_resource_created_or_updated)
    /// but writes a merge patch.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn eventually_resource_created_or_patched(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        self.apply(opts, Write::CreateOrPatch).await
    }

    /// Create or update the resource once, then require the stored resource to
    /// satisfy the condition for the whole consistently duration.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn consistently_resource_created_or_updated(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        self.apply_consistently(opts, Write::CreateOrUpdate).await
    }

    /// Create or patch the resource once, then require the stored resource to
    /// satisfy the condition for the whole consistently duration.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn consistently_resource_created_or_patched(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        self.apply_consistently(opts, Write::CreateOrPatch).await
    }

    /// Read the resource, retrying transient failures. `None` when it does not
    /// exist.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn fetch_resource(&self, opts: ResourceOptions) -> Result<Option<DynamicObject>> {
        check(&opts)?;
        let diag = opts.diagnostics("failed to fetch resource");
        let opts = &opts;
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(found) => Ok(found),
                Err(err) if opts.accepts(&err) => Ok(None),
                Err(err) => Err(read_failure(opts, err)),
            }
        })
        .await
    }

    /// List the kind, retrying transient failures.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind))]
    pub async fn fetch_resources(&self, opts: ResourceOptions) -> Result<Vec<DynamicObject>> {
        check(&opts)?;
        let diag = opts.diagnostics("failed to list resources");
        let opts = &opts;
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            match self.client.list(&opts.gvk, &opts.list_filter).await {
                Ok(items) => Ok(items),
                Err(err) if opts.accepts(&err) => Ok(Vec::new()),
                Err(err) => Err(read_failure(opts, err)),
            }
        })
        .await
    }

    /// Wait until exactly one resource of the kind exists in `namespace` and
    /// return it.
    #[instrument(skip(self, gvk), fields(kind = %gvk.kind))]
    pub async fn fetch_single_resource_of_kind(
        &self,
        gvk: GroupVersionKind,
        namespace: &str,
    ) -> Result<DynamicObject> {
        let message = format!("expected exactly one {} in namespace {namespace}", gvk.kind);
        let mut items = self
            .ensure_resources_exist(
                ResourceOptions::kind(gvk)
                    .namespace_filter(namespace)
                    .condition(Condition::count(Comparison::Eq, 1))
                    .custom_error_msg(message.clone()),
            )
            .await?;
        items.pop().ok_or(Error::Assertion(message))
    }

    /// Wait for the resource like [`ensure_resource_exists`](Self::ensure_resource_exists)
    /// and project it into `K`.
    pub async fn fetch_typed_resource<K>(&self, opts: ResourceOptions) -> Result<K>
    where
        K: DeserializeOwned,
    {
        let obj = self.ensure_resource_exists(opts).await?;
        object::project(&obj)
    }

    async fn remove_finalizers(&self, opts: &ResourceOptions) -> BestEffort {
        let cleanup = transform::clear_finalizers();
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let existing = match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(Some(obj)) => obj,
                Ok(None) => return BestEffort::Skipped("resource not found".to_owned()),
                Err(err) if err.is_no_match() || err.is_not_found() => {
                    return BestEffort::Skipped(err.to_string())
                }
                Err(err) => return BestEffort::Failed(err.to_string()),
            };
            if existing.finalizers().is_empty() {
                return BestEffort::Skipped("no finalizers".to_owned());
            }
            let mut cleared = existing.clone();
            if let Err(err) = cleanup.apply(&mut cleared) {
                return BestEffort::Failed(err.to_string());
            }
            let Some(patch) =
                object::merge_patch_diff(&object::to_value(&existing), &object::to_value(&cleared))
            else {
                return BestEffort::Skipped("no finalizers".to_owned());
            };
            match self.client.patch_merge(&opts.gvk, &opts.nn, &patch).await {
                Ok(_) => return BestEffort::Done,
                Err(err) if err.is_conflict() => {
                    debug!(attempt, %err, "finalizer removal raced, retrying");
                }
                Err(err) if err.is_no_match() || err.is_not_found() || err.is_invalid() => {
                    return BestEffort::Skipped(err.to_string())
                }
                Err(err) => return BestEffort::Failed(err.to_string()),
            }
        }
        BestEffort::Failed(format!(
            "still conflicting after {MAX_CONFLICT_RETRIES} attempts"
        ))
    }

    /// Delete the resource.
    ///
    /// With `ignore_not_found(false)` the resource must exist first. A resource
    /// or kind that is missing at deletion time counts as deleted. Finalizers are
    /// cleared first when requested, without failing the deletion if that does not
    /// work out.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn delete_resource(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        let (kind, id) = (opts.gvk.kind.clone(), opts.resource_id());
        if !opts.ignore_not_found {
            self.ensure_resource_exists(opts.probe(format!(
                "expected {kind} '{id}' to exist before deleting it"
            )))
            .await?;
        }
        if opts.remove_finalizers_on_delete {
            self.remove_finalizers(&opts).await.log("remove finalizers");
        }
        match self
            .client
            .delete(&opts.gvk, &opts.nn, &opts.delete_options)
            .await
        {
            Ok(()) => info!("resource deleted"),
            Err(err) if err.is_not_found() => {
                debug!("resource already absent");
                return Ok(());
            }
            Err(err) if err.is_no_match() => {
                warn!(%err, "kind is not registered, nothing to delete");
                return Ok(());
            }
            Err(err) if opts.accepts(&err) => return Ok(()),
            Err(err) => return Err(client_error(&opts, err)),
        }
        if opts.wait_for_deletion {
            self.ensure_resource_gone(
                opts.probe(format!("{kind} '{id}' was not fully deleted")),
            )
            .await?;
        }
        if opts.wait_for_recreation {
            self.ensure_resource_exists(
                opts.probe(format!("{kind} '{id}' was not recreated after deletion")),
            )
            .await?;
        }
        Ok(())
    }

    /// Delete every resource matching the list filter.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind))]
    pub async fn delete_resources(&self, opts: ResourceOptions) -> Result<()> {
        check(&opts)?;
        let diag = opts.diagnostics("failed to delete resources");
        {
            let opts = &opts;
            retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
                match self
                    .client
                    .delete_collection(&opts.gvk, &opts.list_filter, &opts.delete_options)
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) if err.is_no_match() => {
                        warn!(%err, "kind is not registered, nothing to delete");
                        Ok(())
                    }
                    Err(err) if opts.accepts(&err) => Ok(()),
                    Err(err) => Err(Attempt::Retry(format!("failed to delete: {err}"))),
                }
            })
            .await?;
        }
        info!("resources deleted");
        if opts.wait_for_deletion {
            self.ensure_resources_gone(opts).await?;
        }
        Ok(())
    }

    /// Delete the resource and wait for a controller to recreate it with a new
    /// identity. Returns the recreated resource.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_deleted_then_recreated(
        &self,
        opts: ResourceOptions,
    ) -> Result<DynamicObject> {
        check(&opts)?;
        let original = self
            .ensure_resource_exists(opts.probe("resource to recreate was not found"))
            .await?;
        let before = Incarnation::of(&original);
        // A fast controller recreates the resource before absence is ever observed.
        self.delete_resource(
            opts.clone()
                .wait_for_deletion(false)
                .wait_for_recreation(false),
        )
        .await?;

        let diag = opts.diagnostics("deletion was not observed");
        let (probe, before_ref) = (&opts, &before);
        retry::eventually(probe.eventually(&self.timeouts), &diag, move || async move {
            match self.client.get(&probe.gvk, &probe.nn).await {
                Ok(None) => Ok(()),
                Ok(Some(obj)) if Incarnation::of(&obj).uid == before_ref.uid => Err(
                    Attempt::Retry("resource still exists with its original UID".to_owned()),
                ),
                Ok(Some(_)) => Ok(()),
                Err(err) if err.is_not_found() || err.is_no_match() => Ok(()),
                Err(err) => Err(Attempt::Retry(format!("failed to read: {err}"))),
            }
        })
        .await?;

        debug!(delay = ?self.timeouts.cache_refresh_delay, "waiting for caches to observe the deletion");
        tokio::time::sleep(self.timeouts.cache_refresh_delay).await;

        let diag = opts.diagnostics("resource was not recreated with a new identity");
        let recreated = retry::eventually(probe.eventually(&self.timeouts), &diag, move || async move {
            let obj = match self.client.get(&probe.gvk, &probe.nn).await {
                Ok(Some(obj)) => obj,
                Ok(None) => return Err(Attempt::Retry("not recreated yet".to_owned())),
                Err(err) => return Err(read_failure(probe, err)),
            };
            let after = Incarnation::of(&obj);
            if after.uid == before_ref.uid {
                return Err(Attempt::Retry("still has its original UID".to_owned()));
            }
            if after.resource_version == before_ref.resource_version {
                return Err(Attempt::Retry("resourceVersion did not change".to_owned()));
            }
            Ok(obj)
        })
        .await?;
        info!(uid = ?recreated.metadata.uid, "resource recreated");
        Ok(recreated)
    }

    /// Check once that an object already in hand satisfies a condition.
    pub fn ensure_resource_condition_met(
        &self,
        obj: &DynamicObject,
        condition: &Condition,
    ) -> Result<()> {
        condition.validate().map_err(Error::Precondition)?;
        condition.evaluate(&Subject::object(obj)).map_err(|m| {
            Error::Assertion(format!(
                "expected {} '{}' to satisfy {condition}: {m}",
                object::kind_of(obj),
                object::NamespacedName::of(obj)
            ))
        })
    }
}
