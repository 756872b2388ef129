use std::collections::BTreeSet;
use std::time::Instant;

use crate::frame::format::VideoFormat;

/// Per-device runtime state (broadcaster/listeners), distinct from the
/// persisted registry entry in [`crate::preferences`]. Follows the
/// `Idle`/`Broadcasting(peer)` state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
	Idle,
	Broadcasting(String),
}

pub struct DeviceRuntime {
	pub state: DeviceState,
	pub active_format: Option<VideoFormat>,
	pub listeners: BTreeSet<String>,
	pub last_activity: Instant,
}

impl DeviceRuntime {
	pub fn new() -> Self {
		Self { state: DeviceState::Idle, active_format: None, listeners: BTreeSet::new(), last_activity: Instant::now() }
	}

	pub fn broadcaster(&self) -> Option<&str> {
		match &self.state {
			DeviceState::Broadcasting(peer_id) => Some(peer_id.as_str()),
			DeviceState::Idle => None,
		}
	}

	pub fn is_idle_and_unwatched(&self) -> bool {
		self.state == DeviceState::Idle && self.listeners.is_empty()
	}

	pub fn touch(&mut self) {
		self.last_activity = Instant::now();
	}
}

impl Default for DeviceRuntime {
	fn default() -> Self {
		Self::new()
	}
}
