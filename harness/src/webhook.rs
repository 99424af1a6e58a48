//! Assertions that admission webhooks reject invalid writes.
use std::future::Future;

use kube::api::DynamicObject;
use tracing::{debug, info, instrument};

use crate::{
    context::TestContext,
    error::{ClientError, Error, Result},
    lifecycle::{check, client_error, mutate, not_found},
    object,
    options::{ObjectSource, ResourceOptions},
    retry::{self, Attempt},
};

// Why a write outcome does not prove the webhook rejected it.
fn rejection_mismatch(
    opts: &ResourceOptions,
    operation: &str,
    result: Result<(), ClientError>,
) -> Option<String> {
    let err = match result {
        Ok(()) => return Some(format!("{operation} succeeded")),
        Err(err) => err,
    };
    if let Some(acceptable) = &opts.acceptable_err {
        if !acceptable.accepts(&err) {
            return Some(format!(
                "expected an error matching {}, got: {err}",
                acceptable.name()
            ));
        }
    } else if !err.is_webhook_rejection() {
        return Some(format!(
            "expected a webhook rejection (403 Forbidden, 400 Bad Request or 500 Internal Error), got: {err}"
        ));
    }
    let message = err.to_string();
    if let Some(field) = &opts.field_name {
        if !message.contains(field.as_str()) && !message.contains(&field.to_lowercase()) {
            return Some(format!("rejection does not mention field '{field}': {message}"));
        }
    }
    if let Some(value) = &opts.invalid_value {
        if !message.contains(value.as_str()) {
            return Some(format!("rejection does not mention value '{value}': {message}"));
        }
    }
    None
}

impl TestContext {
    /// Repeat `operation` until it is rejected the way the options describe.
    ///
    /// By default the error must be a webhook rejection. An acceptable error
    /// predicate replaces that check. `field_name` and `invalid_value` must appear in
    /// the error message when set.
    pub async fn ensure_webhook_blocks_operation<F, Fut>(
        &self,
        opts: &ResourceOptions,
        operation: &'static str,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Result<(), ClientError>>>,
    {
        check(opts)?;
        let diag = opts.diagnostics("write was expected to be rejected by a webhook");
        let outcome = retry::eventually(opts.eventually(&self.timeouts), &diag, move || {
            let attempt = f();
            async move {
                let result = attempt.await?;
                match rejection_mismatch(opts, operation, result) {
                    None => Ok(()),
                    Some(reason) => Err(Attempt::Retry(reason)),
                }
            }
        })
        .await;
        match outcome {
            Ok(()) => {
                info!(operation, "write rejected as expected");
                Ok(())
            }
            Err(Error::Timeout {
                kind,
                id,
                last,
                message,
                ..
            }) => Err(Error::WebhookNotEnforced {
                kind,
                id,
                operation,
                observed: last,
                message,
            }),
            Err(err) => Err(err),
        }
    }

    /// Assert that creating the object is rejected.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_webhook_blocks_resource_creation(&self, opts: ResourceOptions) -> Result<()> {
        let template = match &opts.source {
            Some(ObjectSource::ToCreate(obj)) => obj.clone(),
            Some(ObjectSource::Minimal) => object::minimal(&opts.gvk, &opts.nn),
            _ => {
                return Err(Error::Precondition(format!(
                    "{} '{}': creation checks need ResourceOptions::to_create or minimal",
                    opts.gvk.kind,
                    opts.resource_id()
                )))
            }
        };
        let opts = &opts;
        let template = &template;
        self.ensure_webhook_blocks_operation(opts, "create", move || async move {
            let mut obj: DynamicObject = template.clone();
            mutate(opts, &mut obj)?;
            let obj = object::strip_server_fields(obj);
            Ok::<_, Error>(self.client.create(&opts.gvk, &obj).await.map(|_| ()))
        })
        .await
    }

    /// Assert that applying the mutation to the stored resource and replacing it
    /// is rejected.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_webhook_blocks_resource_update(&self, opts: ResourceOptions) -> Result<()> {
        if opts.mutate.is_none() {
            return Err(Error::Precondition(format!(
                "{} '{}': update checks need a mutation",
                opts.gvk.kind,
                opts.resource_id()
            )));
        }
        let opts = &opts;
        self.ensure_webhook_blocks_operation(opts, "update", move || async move {
            let mut obj = match self.client.get(&opts.gvk, &opts.nn).await {
                Ok(Some(obj)) => obj,
                Ok(None) => return Ok(Err(not_found(opts))),
                Err(err) if err.is_no_match() => return Err(client_error(opts, err)),
                Err(err) => return Ok(Err(err)),
            };
            mutate(opts, &mut obj)?;
            Ok::<_, Error>(self.client.replace(&opts.gvk, &obj).await.map(|_| ()))
        })
        .await
    }

    /// Assert that a resource of the kind exists and that creating another one is
    /// rejected.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn ensure_resource_is_unique(&self, opts: ResourceOptions) -> Result<()> {
        let existing = self
            .ensure_resources_exist(ResourceOptions::kind(opts.gvk.clone()))
            .await?;
        debug!(count = existing.len(), "found existing instance");
        let opts = if opts.custom_error_msg.is_none() {
            let msg = format!("creating a second {} should be blocked", opts.gvk.kind);
            opts.custom_error_msg(msg)
        } else {
            opts
        };
        self.ensure_webhook_blocks_resource_creation(opts).await
    }
}
