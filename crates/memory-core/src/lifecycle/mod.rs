pub mod hydrate;
pub mod hygiene;
pub mod snapshot;

pub use hydrate::should_hydrate;
pub use hygiene::HygieneOperator;
pub use snapshot::SnapshotOperator;
