/*
    Boundary subsystem - What sits between the host and the remote contexts

    Reference retention for everything handed across, and a simulated link
    (JSON frames, commands, fault injection) for running publisher and
    reconciler as if they lived in separate contexts.
*/

pub mod faults;
pub mod link;
pub mod retention;

pub use faults::{FaultInjector, FaultStats};
pub use link::{
    decode_publication, encode_publication, spawn_link, Frame, LinkCommand, LinkConfig, LinkHandle, WireKey,
    WireValue,
};
pub use retention::{RefId, RetentionStats, RetentionTable};
