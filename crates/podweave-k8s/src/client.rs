use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};

/// Loads kubeconfig and builds clients for its contexts
pub struct KubeClient {
    kubeconfig: Kubeconfig,
    current_context: Option<String>,
}

impl KubeClient {
    /// Create a new KubeClient by loading the kubeconfig
    pub fn new() -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?;
        Ok(Self::from_kubeconfig(kubeconfig))
    }

    pub fn from_kubeconfig(kubeconfig: Kubeconfig) -> Self {
        let current_context = kubeconfig.current_context.clone();
        Self {
            kubeconfig,
            current_context,
        }
    }

    pub fn contexts(&self) -> Vec<&str> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|ctx| ctx.name.as_str())
            .collect()
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    /// Resolves `context`, falling back to the current context
    fn context_name(&self, context: Option<&str>) -> Result<String> {
        let name = match context {
            Some(name) => name,
            None => self
                .current_context()
                .context("No context given and kubeconfig has no current context")?,
        };

        if !self.contexts().contains(&name) {
            anyhow::bail!("Context '{}' not found in kubeconfig", name);
        }
        Ok(name.to_string())
    }

    /// Namespace configured on the context, if any
    pub fn default_namespace(&self, context: Option<&str>) -> Option<String> {
        let name = self.context_name(context).ok()?;
        self.kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.context.as_ref())
            .and_then(|c| c.namespace.clone())
    }

    /// Create a kube::Client for a context, or the current one when `None`
    pub async fn client_for_context(&self, context: Option<&str>) -> Result<kube::Client> {
        let context_name = self.context_name(context)?;

        let config = kube::Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context_name.clone()),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {}",
            context_name
        ))?;

        kube::Client::try_from(config).context(format!(
            "Failed to create client for context: {}",
            context_name
        ))
    }
}
