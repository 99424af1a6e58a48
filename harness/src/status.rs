//! Writes to `.status.conditions` through the status subresource.
//!
//! The API server drops status changes sent to the main resource of kinds with a
//! status subresource, so simulating what a paused or external controller would
//! report has to go through these helpers.
use k8s_openapi::chrono::{SecondsFormat, Utc};
use kube::api::DynamicObject;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::{
    context::TestContext,
    error::{Error, Result},
    lifecycle::{check, client_error, read_failure},
    options::ResourceOptions,
    retry::{self, Attempt},
    transform,
};

/// An entry of `.status.conditions` to report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusCondition {
    /// Condition type, e.g. `Degraded`.
    pub type_: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
    /// Machine readable reason. Checked after the write when not empty.
    pub reason: String,
    /// Human readable message. The stored message must contain it when not empty.
    pub message: String,
}

impl StatusCondition {
    /// A condition without reason or message.
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: String::new(),
            message: String::new(),
        }
    }

    /// Set the reason.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    // Update the entry of the same type or append one. The transition time only
    // moves when the status changes.
    fn set_in(&self, conditions: &mut Vec<Value>) {
        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        match conditions
            .iter_mut()
            .find(|c| type_of(c) == Some(self.type_.as_str()))
        {
            Some(Value::Object(entry)) => {
                if entry.get("status").and_then(Value::as_str) != Some(self.status.as_str()) {
                    entry.insert("lastTransitionTime".to_owned(), now);
                }
                entry.insert("status".to_owned(), self.status.clone().into());
                entry.insert("reason".to_owned(), self.reason.clone().into());
                entry.insert("message".to_owned(), self.message.clone().into());
            }
            _ => conditions.push(json!({
                "type": self.type_,
                "status": self.status,
                "reason": self.reason,
                "message": self.message,
                "lastTransitionTime": now,
            })),
        }
    }

    fn verify(&self, conditions: &[Value]) -> Result<(), String> {
        let Some(found) = conditions
            .iter()
            .find(|c| type_of(c) == Some(self.type_.as_str()))
        else {
            return Err(format!("condition {} is not reported", self.type_));
        };
        let field = |name: &str| found.get(name).and_then(Value::as_str).unwrap_or_default();
        if field("status") != self.status {
            return Err(format!(
                "condition {} is {:?}, expected {:?}",
                self.type_,
                field("status"),
                self.status
            ));
        }
        if !self.reason.is_empty() && field("reason") != self.reason {
            return Err(format!(
                "condition {} has reason {:?}, expected {:?}",
                self.type_,
                field("reason"),
                self.reason
            ));
        }
        if !self.message.is_empty() && !field("message").contains(self.message.as_str()) {
            return Err(format!(
                "condition {} message {:?} does not contain {:?}",
                self.type_,
                field("message"),
                self.message
            ));
        }
        Ok(())
    }
}

fn type_of(condition: &Value) -> Option<&str> {
    condition.get("type").and_then(Value::as_str)
}

fn conditions_of(obj: &DynamicObject) -> Vec<Value> {
    obj.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

impl TestContext {
    async fn status_target(&self, opts: &ResourceOptions) -> Result<DynamicObject, Attempt> {
        match self.client.get(&opts.gvk, &opts.nn).await {
            Ok(Some(obj)) => Ok(obj),
            Ok(None) => Err(Attempt::Retry("resource not found".to_owned())),
            Err(err) => Err(read_failure(opts, err)),
        }
    }

    // Read, edit and replace the conditions, then read them back, all in one
    // attempt so a controller overwriting them is retried.
    async fn rewrite_status_conditions(
        &self,
        opts: &ResourceOptions,
        edit: impl Fn(&mut Vec<Value>),
        verify: impl Fn(&[Value]) -> Result<(), String>,
    ) -> Result<DynamicObject> {
        check(opts)?;
        let diag = opts.diagnostics("failed to update status conditions");
        let (edit, verify) = (&edit, &verify);
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            let mut obj = self.status_target(opts).await?;
            let mut conditions = conditions_of(&obj);
            edit(&mut conditions);
            transform::set(".status.conditions", conditions)
                .apply(&mut obj)
                .map_err(|source| Error::Mutation {
                    kind: opts.gvk.kind.clone(),
                    id: opts.resource_id(),
                    source,
                })?;
            match self.client.replace_status(&opts.gvk, &obj).await {
                Ok(_) => {}
                Err(err) if err.is_no_match() => {
                    return Err(Attempt::Fatal(client_error(opts, err)))
                }
                Err(err) => return Err(Attempt::Retry(format!("failed to update status: {err}"))),
            }
            let stored = self.status_target(opts).await?;
            verify(&conditions_of(&stored)).map_err(Attempt::Retry)?;
            Ok(stored)
        })
        .await
    }

    /// Set a `.status.conditions` entry through the status subresource and wait
    /// until it reads back.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn, condition = %condition.type_))]
    pub async fn inject_status_condition(
        &self,
        opts: ResourceOptions,
        condition: StatusCondition,
    ) -> Result<DynamicObject> {
        let obj = self
            .rewrite_status_conditions(
                &opts,
                |conditions| condition.set_in(conditions),
                |conditions| condition.verify(conditions),
            )
            .await?;
        info!(status = %condition.status, "status condition injected");
        Ok(obj)
    }

    /// Drop the `.status.conditions` entry of the given type and wait until it no
    /// longer reads back.
    #[instrument(skip(self, opts), fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn remove_status_condition(
        &self,
        opts: ResourceOptions,
        condition_type: &str,
    ) -> Result<DynamicObject> {
        self.rewrite_status_conditions(
            &opts,
            |conditions| conditions.retain(|c| type_of(c) != Some(condition_type)),
            |conditions| match conditions.iter().find(|c| type_of(c) == Some(condition_type)) {
                Some(_) => Err(format!("condition {condition_type} is still reported")),
                None => Ok(()),
            },
        )
        .await
    }

    /// Empty `.status.conditions` with a status merge patch and wait until no
    /// condition reads back.
    #[instrument(skip_all, fields(kind = %opts.gvk.kind, id = %opts.nn))]
    pub async fn clear_status_conditions(&self, opts: ResourceOptions) -> Result<DynamicObject> {
        check(&opts)?;
        let diag = opts.diagnostics("failed to clear status conditions");
        let patch = json!({"status": {"conditions": []}});
        let (opts, patch) = (&opts, &patch);
        retry::eventually(opts.eventually(&self.timeouts), &diag, move || async move {
            match self.client.patch_status(&opts.gvk, &opts.nn, patch).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    return Err(Attempt::Retry("resource not found".to_owned()))
                }
                Err(err) if err.is_no_match() => {
                    return Err(Attempt::Fatal(client_error(opts, err)))
                }
                Err(err) => return Err(Attempt::Retry(format!("failed to patch status: {err}"))),
            }
            let stored = self.status_target(opts).await?;
            match conditions_of(&stored).len() {
                0 => Ok(stored),
                left => Err(Attempt::Retry(format!("{left} conditions still reported"))),
            }
        })
        .await
    }
}
