//! Test tooling for Coldwatch: a fault-injecting store wrapper, a recording
//! notification channel and a multi-instance cluster harness.

pub mod fault_injection;
pub mod recording;
pub mod scenarios;

pub use fault_injection::{FaultStats, FaultType, FaultyStore};
pub use recording::RecordingChannel;
pub use scenarios::{ClusterTiming, CollectorCluster};

/// Install a warn-level subscriber for test output. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coldwatch=warn".into()),
        )
        .with_test_writer()
        .try_init();
}
