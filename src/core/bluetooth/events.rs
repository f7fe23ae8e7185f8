//! Messages drained from radio activity into the session event loop.

use crate::core::bluetooth::types::{Advertisement, LinkLoss};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A matching advertisement received during scan session `session_id`
    Advertisement {
        session_id: u64,
        advertisement: Advertisement,
    },
    /// A live link went away without an operator request
    LinkLost {
        address: String,
        link_id: u64,
        loss: LinkLoss,
    },
}
