//! Event bus for intra-process coupling between subsystems
//!
//! A priority-aware publish/subscribe fabric:
//! - Typed messages routed by event type
//! - Three priority lanes; higher lanes overtake lower ones at dispatch
//! - Handler failures are caught, counted, and never reach the publisher
//!
//! The cross-subsystem layer in [`cross`] adds the static routing table and
//! the typed event vocabulary the integration bridges speak.

pub mod bus;
pub mod cross;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use bus::{BusStats, EventBus};
pub use cross::{CrossBus, CrossBusStats, CrossEvent, CrossEventKind};

/// Dispatch priority; higher lanes pre-empt lower ones at dispatch points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Normal,
    High,
    Critical,
}

impl EventPriority {
    pub(crate) const COUNT: usize = 3;

    /// Queue index, highest priority first
    pub(crate) fn lane(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Core trait for messages carried by the bus
pub trait BusMessage: Send + Sync + Clone + Debug + 'static {
    /// Event type used for subscriber routing
    fn event_type(&self) -> &'static str;

    /// Dispatch priority
    fn priority(&self) -> EventPriority {
        EventPriority::Normal
    }
}

/// Subscriber callback; sync work runs inline inside `handle`
#[async_trait]
pub trait EventHandler<M: BusMessage>: Send + Sync {
    async fn handle(&self, event: M) -> anyhow::Result<()>;

    /// Identifier used in logs and diagnostics
    fn id(&self) -> &str;
}
