//! Vector search for docqa: an ephemeral exact index used per request and
//! persistent collection stores behind the `VectorStore` trait.

pub mod flat;
pub mod lance;
pub mod memory;
pub mod similarity;

pub use flat::{FlatIndex, Neighbor};
pub use lance::LanceStore;
pub use memory::MemoryStore;

use docqa_core::config::StoreSettings;
use docqa_core::Result;
use std::path::Path;

/// Open the LanceDB store named by `settings`, resolving a relative uri
/// against `base`.
pub async fn store_from_settings(settings: &StoreSettings, base: &Path) -> Result<LanceStore> {
    LanceStore::connect(&settings.resolved_uri(base)).await
}
