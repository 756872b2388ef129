use tokio::sync::mpsc;

use crate::protocol::Frame;

/// A connected control-protocol peer. Grounded on `clients.rs`'s
/// per-client bookkeeping, narrowed to what the broker needs: an outbox
/// to push frames to that connection's writer task, and liveness state.
pub struct Peer {
	pub id: String,
	pub role: String,
	pub name: String,
	pub outbox: mpsc::Sender<Frame>,
	pub missed_pings: u32,
	pub pending_ping_correlation: Option<u32>,
}

impl Peer {
	pub fn new(id: String, role: String, name: String, outbox: mpsc::Sender<Frame>) -> Self {
		Self { id, role, name, outbox, missed_pings: 0, pending_ping_correlation: None }
	}
}
