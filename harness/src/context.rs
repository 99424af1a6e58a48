//! The entry point tests use to talk to the cluster.
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::{
    client::{KubeResourceClient, ResourceClient},
    config::HarnessConfig,
    object::NamespacedName,
    retry::Timeouts,
};

/// Owns the cluster client, the suite configuration and the timing used by every
/// lifecycle operation.
///
/// Cloning is cheap. Changing the timing produces a new context and leaves the
/// original untouched, so a test can use longer timeouts for one step without
/// affecting the others.
#[derive(Clone)]
pub struct TestContext {
    pub(crate) client: Arc<dyn ResourceClient>,
    config: Arc<HarnessConfig>,
    pub(crate) timeouts: Timeouts,
}

impl TestContext {
    /// Build a context from a client and a configuration.
    pub fn new(client: impl ResourceClient + 'static, config: HarnessConfig) -> Self {
        let timeouts = config.timeouts();
        Self {
            client: Arc::new(client),
            config: Arc::new(config),
            timeouts,
        }
    }

    /// Connect to the cluster of the ambient kubeconfig and read the configuration
    /// from the environment. Installs test logging on first use.
    pub async fn from_env() -> Result<Self> {
        kube_eventually_common::telemetry::init_for_tests();
        let config = HarnessConfig::from_env()?;
        let client = KubeResourceClient::try_default().await?;
        info!(
            operator_namespace = %config.operator_namespace,
            apps_namespace = %config.apps_namespace,
            eventually_timeout = ?config.eventually_timeout,
            "connected test context"
        );
        Ok(Self::new(client, config))
    }

    /// A copy of this context using different timing.
    pub fn with_timeouts(&self, timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            ..self.clone()
        }
    }

    /// The timing used by lifecycle operations.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// The suite configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The underlying client, for calls the lifecycle operations do not cover.
    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    /// Identity of the DataScienceCluster under test.
    pub fn dsc(&self) -> NamespacedName {
        NamespacedName::cluster(&self.config.dsc_name)
    }

    /// Identity of the DSCInitialization under test.
    pub fn dsci(&self) -> NamespacedName {
        NamespacedName::cluster(&self.config.dsci_name)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use clap::Parser;

    use super::*;
    use crate::{client::fake::FakeCluster, gvk};

    /// Default configuration, ignoring the environment of the test process.
    pub fn config() -> HarnessConfig {
        HarnessConfig::try_parse_from(["kube-eventually"]).unwrap()
    }

    /// A context over a fake cluster knowing the kinds used in tests.
    pub fn fake() -> (TestContext, FakeCluster) {
        let cluster = FakeCluster::with_kinds([
            (gvk::namespace(), false),
            (gvk::config_map(), true),
            (gvk::deployment(), true),
            (gvk::custom_resource_definition(), false),
            (gvk::data_science_cluster(), false),
            (gvk::monitoring(), false),
        ]);
        let timeouts = Timeouts::default()
            .with_eventually(
                std::time::Duration::from_secs(10),
                std::time::Duration::from_secs(1),
            )
            .with_consistently(
                std::time::Duration::from_secs(3),
                std::time::Duration::from_secs(1),
            )
            .with_cache_refresh_delay(std::time::Duration::from_secs(1));
        let ctx = TestContext::new(cluster.clone(), config()).with_timeouts(timeouts);
        (ctx, cluster)
    }

    #[test]
    fn with_timeouts_leaves_original_untouched() {
        let (ctx, _) = fake();
        let slow = ctx.with_timeouts(
            ctx.timeouts()
                .with_eventually(std::time::Duration::from_secs(600), std::time::Duration::from_secs(5)),
        );
        assert_eq!(ctx.timeouts().eventually_timeout.as_secs(), 10);
        assert_eq!(slow.timeouts().eventually_timeout.as_secs(), 600);
        assert_eq!(slow.dsc().to_string(), "default-dsc");
    }
}
