pub mod agency;
pub mod provider;

pub use agency::{TestAgency, fields, key, open_shared, snapshot};
pub use provider::InMemorySnapshotProvider;

use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
