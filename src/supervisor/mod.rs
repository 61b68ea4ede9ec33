//! Peer process supervision: spawning, termination, orphan reaping.

pub mod launch;
pub mod registry;

pub use launch::{LaunchSpec, PeerHandle, PeerSupervisor, SpawnedPeer, DEFAULT_KILL_GRACE};
pub use registry::{reap_orphans, ProcessRecord, ProcessRegistry};
