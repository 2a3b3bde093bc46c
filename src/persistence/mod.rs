pub mod store;

pub use store::{ArtifactRecord, ArtifactStatus, LineageRow, Store};
