//! Shared infrastructure for the Sentinel safety kernel
//!
//! Cross-cutting pieces every service crate leans on:
//! - Typed error taxonomy
//! - Persisted key layout and channel names
//! - KV store abstraction (Redis-backed or in-memory)
//! - Priority-aware event bus with the cross-subsystem routing layer

pub mod constants;
pub mod errors;
pub mod event_bus;
pub mod kv;

pub use errors::{KernelError, KernelResult};
pub use event_bus::{
    BusMessage, BusStats, CrossBus, CrossEvent, CrossEventKind, EventBus, EventHandler,
    EventPriority,
};
pub use kv::{KvStore, MemoryKv, RedisKv};
