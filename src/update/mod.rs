//! Remote index record maintenance.

mod logic;

pub use logic::{IndexUpdate, IndexUpdatePipeline, LATEST_FIELD, decrement_latest};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::remote::RemoteStore;

/// Runs one index update against `store` using the `update` section of the config.
pub async fn run_update_flow(app_config: &AppConfig, store: &mut dyn RemoteStore) -> Result<IndexUpdate> {
    IndexUpdatePipeline::new(&app_config.update.index_file)
        .run(store)
        .await
}
