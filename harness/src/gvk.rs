//! Kind/version descriptors for the resources the e2e suites touch.
//!
//! Core kinds could be derived from `k8s-openapi` types, but the custom resources
//! are only known by their group, version and kind, so all of them are spelled out
//! here the same way.
use kube::core::GroupVersionKind;

fn gvk(group: &str, version: &str, kind: &str) -> GroupVersionKind {
    GroupVersionKind::gvk(group, version, kind)
}

/// core/v1 Namespace
pub fn namespace() -> GroupVersionKind {
    gvk("", "v1", "Namespace")
}

/// core/v1 ConfigMap
pub fn config_map() -> GroupVersionKind {
    gvk("", "v1", "ConfigMap")
}

/// core/v1 Secret
pub fn secret() -> GroupVersionKind {
    gvk("", "v1", "Secret")
}

/// core/v1 Service
pub fn service() -> GroupVersionKind {
    gvk("", "v1", "Service")
}

/// core/v1 Pod
pub fn pod() -> GroupVersionKind {
    gvk("", "v1", "Pod")
}

/// apps/v1 Deployment
pub fn deployment() -> GroupVersionKind {
    gvk("apps", "v1", "Deployment")
}

/// apiextensions.k8s.io/v1 CustomResourceDefinition
pub fn custom_resource_definition() -> GroupVersionKind {
    gvk("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

/// admissionregistration.k8s.io/v1 ValidatingWebhookConfiguration
pub fn validating_webhook_configuration() -> GroupVersionKind {
    gvk(
        "admissionregistration.k8s.io",
        "v1",
        "ValidatingWebhookConfiguration",
    )
}

/// DataScienceCluster, the top level custom resource reconciled by the operator.
pub fn data_science_cluster() -> GroupVersionKind {
    gvk("datasciencecluster.opendatahub.io", "v2", "DataScienceCluster")
}

/// DSCInitialization, the platform initialization custom resource.
pub fn dsc_initialization() -> GroupVersionKind {
    gvk("dscinitialization.opendatahub.io", "v2", "DSCInitialization")
}

/// Monitoring service custom resource.
pub fn monitoring() -> GroupVersionKind {
    gvk("services.platform.opendatahub.io", "v1alpha1", "Monitoring")
}

/// Auth service custom resource.
pub fn auth() -> GroupVersionKind {
    gvk("services.platform.opendatahub.io", "v1alpha1", "Auth")
}

/// TempoStack, deployed when tracing is enabled on the Monitoring resource.
pub fn tempo_stack() -> GroupVersionKind {
    gvk("tempo.grafana.com", "v1alpha1", "TempoStack")
}

/// OLM Subscription
pub fn subscription() -> GroupVersionKind {
    gvk("operators.coreos.com", "v1alpha1", "Subscription")
}

/// Render a kind for messages, e.g. `apps/v1, Kind=Deployment`.
pub fn display(gvk: &GroupVersionKind) -> String {
    format!("{}, Kind={}", gvk.api_version(), gvk.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_kinds_have_no_group() {
        assert_eq!(namespace().api_version(), "v1");
        assert_eq!(deployment().api_version(), "apps/v1");
        assert_eq!(display(&config_map()), "v1, Kind=ConfigMap");
    }
}
