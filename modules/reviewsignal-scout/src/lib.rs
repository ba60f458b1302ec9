pub mod classifier;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod router;
pub mod sources;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
