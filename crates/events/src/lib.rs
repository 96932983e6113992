//! Ledger notifications: the event contract and the pub/sub seam that carries
//! post-commit stock change events to downstream consumers (report caches, etc.).

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
