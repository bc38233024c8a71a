//! Order placement and everything that happens to an order afterwards.

mod coordinator;
mod lifecycle;

pub use coordinator::OrderCoordinator;
pub use lifecycle::OrderLifecycle;
