//! The outbound message carrier contract.

use crate::model::Endpoint;
use crate::model::RaftMessage;

/// Write-only handle the node uses to send messages to peers.
///
/// Delivery is best-effort: the protocol tolerates message loss,
/// duplication and reordering, so implementations must not block the node
/// and should simply drop messages they cannot send. Inbound messages travel
/// the other way, pushed into the node's mailbox by the transport
/// implementation.
pub trait Transport<O>: Send + 'static {
    fn send(&self, target: &Endpoint, message: RaftMessage<O>);
}
