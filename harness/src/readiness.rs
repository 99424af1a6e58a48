//! Readiness checks for workloads and CRDs the operator manages.
use k8s_openapi::{
    api::apps::v1::Deployment,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use tracing::{info, instrument};

use crate::{
    condition::{Comparison, Condition},
    context::TestContext,
    error::Result,
    gvk,
    object::NamespacedName,
    options::ResourceOptions,
};

impl TestContext {
    /// Wait until the Deployment reports `Available` and exactly `replicas` ready
    /// replicas.
    #[instrument(skip_all, fields(id = %nn, replicas = replicas))]
    pub async fn ensure_deployment_ready(
        &self,
        nn: NamespacedName,
        replicas: i32,
    ) -> Result<Deployment> {
        let id = nn.to_string();
        let ready = Condition::status_condition("Available", "True")
            .and(Condition::equals(".status.readyReplicas", replicas));
        let deployment = self
            .fetch_typed_resource(
                ResourceOptions::named(gvk::deployment(), nn)
                    .condition(ready)
                    .custom_error_msg(format!(
                        "Deployment {id} was expected to be available with {replicas} ready replicas"
                    )),
            )
            .await?;
        info!(replicas, "deployment ready");
        Ok(deployment)
    }

    /// Wait until the CRD reports `Established`.
    #[instrument(skip(self))]
    pub async fn ensure_crd_established(&self, name: &str) -> Result<CustomResourceDefinition> {
        self.fetch_typed_resource(
            ResourceOptions::named(gvk::custom_resource_definition(), NamespacedName::cluster(name))
                .condition(Condition::status_condition("Established", "True"))
                .custom_error_msg(format!("CRD {name} was not established")),
        )
        .await
    }

    /// Wait until at least `count` Deployments in `namespace` match the label
    /// selector.
    #[instrument(skip(self))]
    pub async fn ensure_deployments_exist(
        &self,
        namespace: &str,
        label_selector: &str,
        count: usize,
    ) -> Result<usize> {
        let found = self
            .ensure_resources_exist(
                ResourceOptions::kind(gvk::deployment())
                    .namespace_filter(namespace)
                    .label_selector(label_selector)
                    .condition(Condition::count(Comparison::Ge, count)),
            )
            .await?;
        Ok(found.len())
    }
}
