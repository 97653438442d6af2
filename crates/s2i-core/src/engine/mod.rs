//! Jobs wiring sources, the write orchestrator and the CRM together.

mod ingestion;
mod publish;

pub use ingestion::IngestionJob;
pub use publish::{PublishJob, PublishReport};

use crate::config::CatalogConfig;
use crate::iceberg::{CatalogFactoryRegistry, CatalogOperations};
use crate::Result;
use std::sync::Arc;

/// Build the catalog named by `config` from the default factories.
pub async fn build_catalog(config: &CatalogConfig) -> Result<Arc<dyn CatalogOperations>> {
    CatalogFactoryRegistry::with_defaults().create(config).await
}
