pub mod chroma;
pub mod error;
pub mod local;
pub mod marker;
pub mod migrate;
pub mod traits;
pub mod types;

pub use chroma::ChromaStore;
pub use error::StorageError;
pub use local::LocalVectorStore;
pub use marker::{MigrationMarker, MigrationStatus};
pub use migrate::{DistanceMigrator, MigrationOutcome, DEFAULT_MIGRATION_BATCH};
pub use traits::VectorStore;
pub use types::*;
