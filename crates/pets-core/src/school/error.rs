use crate::BoxError;
use crate::health::HealthError;
use crate::registry::RegistryError;
use crate::service::{ServiceKey, ServiceName, Tier};
use thiserror::Error;

/// Errors from declaring providers or bringing services up
#[derive(Debug, Error)]
pub enum SchoolError {
    #[error("Duplicate provider for service \"{name}\", tier \"{tier}\"\nFirst:  {first}\nSecond: {second}")]
    DuplicateProvider {
        name: ServiceName,
        tier: Tier,
        first: String,
        second: String,
    },

    #[error("No provider found for service \"{name}\", tier \"{tier}\"")]
    NoProviderFound { name: ServiceName, tier: Tier },

    #[error("No service providers found for tier \"{tier}\"")]
    NoProvidersForTier { tier: Tier },

    #[error("Service \"{service}\" depends on service \"{dependency}\", but \"{dependency}\" failed:\n{source}")]
    DependencyFailed {
        service: ServiceName,
        dependency: ServiceName,
        source: Box<SchoolError>,
    },

    #[error("Service dependency cycle: {}", format_chain(.chain))]
    DependencyCycle { chain: Vec<ServiceKey> },

    #[error("Provider for {key} failed: {source}")]
    Provider { key: ServiceKey, source: BoxError },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Health(#[from] HealthError),
}

impl SchoolError {
    /// The innermost error below any dependency annotations.
    pub fn root_cause(&self) -> &SchoolError {
        match self {
            SchoolError::DependencyFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn format_chain(chain: &[ServiceKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
