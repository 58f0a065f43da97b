//! Media negotiation for a single call.

mod coordinator;
mod ice_queue;

pub use coordinator::{
    CoordinatorCommand, CoordinatorError, CoordinatorEvent, NegotiationCoordinator,
    NegotiationRole, MEDIA_FAILURE_REASON,
};
pub use ice_queue::PendingIceQueue;
