pub mod config;
pub mod core_boundary;
pub mod core_sync;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::Config;
pub use core_boundary::{spawn_link, LinkConfig, LinkHandle, RefId, RetentionTable};
pub use core_sync::{
    Delta, DeltaPublisher, DeltaSource, MapArray, ObservableMap, Payload, Reconciler, ReconcilerConfig, Snapshot,
    SyncError, SyncResult,
};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = ReconcilerConfig::default();
        let _: MapArray<String, u32> = MapArray::new();
    }
}
