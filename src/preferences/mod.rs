//! Persistent registry of devices, formats, per-device controls, and
//! globals (C2). Owns the in-memory [`state::PreferencesState`] behind an
//! actor task, the same shape used for runtime state elsewhere in this
//! service, so every mutation is serialized without an explicit `Mutex`.

pub mod ini;
pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::frame::format::VideoFormat;
use crate::preferences::ini::Ini;
use crate::preferences::state::PreferencesState;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
	AddDevice { description: String, preferred_id: Option<String>, reply: Reply<String> },
	RemoveDevice { id: String, reply: Reply<()> },
	ListDevices { reply: oneshot::Sender<Vec<String>> },
	Description { id: String, reply: Reply<String> },
	SetDescription { id: String, description: String, reply: Reply<()> },
	Formats { id: String, reply: Reply<Vec<VideoFormat>> },
	SetFormats { id: String, formats: Vec<VideoFormat>, reply: Reply<()> },
	AddFormat { id: String, format: VideoFormat, index: i64, reply: Reply<()> },
	RemoveFormat { id: String, index: usize, reply: Reply<()> },
	ControlValue { id: String, key: String, reply: Reply<i32> },
	SetControlValue { id: String, key: String, value: i32, reply: Reply<()> },
	AllControls { id: String, reply: Reply<BTreeMap<String, i32>> },
	Picture { reply: oneshot::Sender<String> },
	SetPicture { path: String, reply: Reply<()> },
	LogLevel { reply: oneshot::Sender<i32> },
	SetLogLevel { level: i32, reply: Reply<()> },
	DirectMode { id: String, reply: Reply<bool> },
	SetDirectMode { id: String, value: bool, reply: Reply<()> },
}

#[derive(Clone)]
pub struct PreferencesStore {
	tx: mpsc::Sender<Command>,
}

impl PreferencesStore {
	/// Loads `path` (an empty store if the file doesn't exist) and spawns
	/// the owning actor task.
	pub async fn open(path: PathBuf) -> Result<Self> {
		let state = load(&path).unwrap_or_else(|e| {
			warn!("failed to load preferences from {}: {e}; starting with an empty store", path.display());
			PreferencesState::default()
		});

		let (tx, rx) = mpsc::channel(32);
		tokio::spawn(run(state, path, rx));
		Ok(Self { tx })
	}

	async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx
			.send(build(reply_tx))
			.await
			.map_err(|_| Error::Transport("preferences store actor is gone".into()))?;
		reply_rx.await.map_err(|_| Error::Transport("preferences store actor dropped the reply".into()))?
	}

	pub async fn add_device(&self, description: String, preferred_id: Option<String>) -> Result<String> {
		self.call(|reply| Command::AddDevice { description, preferred_id, reply }).await
	}

	pub async fn remove_device(&self, id: impl Into<String>) -> Result<()> {
		self.call(|reply| Command::RemoveDevice { id: id.into(), reply }).await
	}

	pub async fn list_devices(&self) -> Vec<String> {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(Command::ListDevices { reply }).await.is_err() {
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	pub async fn description(&self, id: impl Into<String>) -> Result<String> {
		self.call(|reply| Command::Description { id: id.into(), reply }).await
	}

	pub async fn set_description(&self, id: impl Into<String>, description: impl Into<String>) -> Result<()> {
		let id = id.into();
		let description = description.into();
		self.call(|reply| Command::SetDescription { id, description, reply }).await
	}

	pub async fn formats(&self, id: impl Into<String>) -> Result<Vec<VideoFormat>> {
		self.call(|reply| Command::Formats { id: id.into(), reply }).await
	}

	pub async fn set_formats(&self, id: impl Into<String>, formats: Vec<VideoFormat>) -> Result<()> {
		let id = id.into();
		self.call(|reply| Command::SetFormats { id, formats, reply }).await
	}

	pub async fn add_format(&self, id: impl Into<String>, format: VideoFormat, index: i64) -> Result<()> {
		let id = id.into();
		self.call(|reply| Command::AddFormat { id, format, index, reply }).await
	}

	pub async fn remove_format(&self, id: impl Into<String>, index: usize) -> Result<()> {
		let id = id.into();
		self.call(|reply| Command::RemoveFormat { id, index, reply }).await
	}

	pub async fn control_value(&self, id: impl Into<String>, key: impl Into<String>) -> Result<i32> {
		let id = id.into();
		let key = key.into();
		self.call(|reply| Command::ControlValue { id, key, reply }).await
	}

	pub async fn set_control_value(&self, id: impl Into<String>, key: impl Into<String>, value: i32) -> Result<()> {
		let id = id.into();
		let key = key.into();
		self.call(|reply| Command::SetControlValue { id, key, value, reply }).await
	}

	pub async fn all_controls(&self, id: impl Into<String>) -> Result<BTreeMap<String, i32>> {
		let id = id.into();
		self.call(|reply| Command::AllControls { id, reply }).await
	}

	pub async fn picture(&self) -> String {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(Command::Picture { reply }).await.is_err() {
			return String::new();
		}
		rx.await.unwrap_or_default()
	}

	pub async fn set_picture(&self, path: impl Into<String>) -> Result<()> {
		let path = path.into();
		self.call(|reply| Command::SetPicture { path, reply }).await
	}

	pub async fn log_level(&self) -> i32 {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(Command::LogLevel { reply }).await.is_err() {
			return 0;
		}
		rx.await.unwrap_or(0)
	}

	pub async fn set_log_level(&self, level: i32) -> Result<()> {
		self.call(|reply| Command::SetLogLevel { level, reply }).await
	}

	pub async fn direct_mode(&self, id: impl Into<String>) -> Result<bool> {
		let id = id.into();
		self.call(|reply| Command::DirectMode { id, reply }).await
	}

	pub async fn set_direct_mode(&self, id: impl Into<String>, value: bool) -> Result<()> {
		let id = id.into();
		self.call(|reply| Command::SetDirectMode { id, value, reply }).await
	}
}

fn load(path: &Path) -> Result<PreferencesState> {
	if !path.exists() {
		return Ok(PreferencesState::default());
	}
	let text = std::fs::read_to_string(path)?;
	let ini = Ini::parse(&text)?;
	PreferencesState::from_ini(&ini)
}

/// Writes to a sibling temp file then renames over `path`, so a reader
/// never observes a partially-written file.
fn save(state: &PreferencesState, path: &Path) -> Result<()> {
	let text = state.to_ini().serialize();
	let tmp_path = path.with_extension("tmp");
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(&tmp_path, text)?;
	std::fs::rename(&tmp_path, path)?;
	Ok(())
}

async fn run(mut state: PreferencesState, path: PathBuf, mut rx: mpsc::Receiver<Command>) {
	macro_rules! persist {
		() => {
			if let Err(e) = save(&state, &path) {
				error!("failed to persist preferences to {}: {e}", path.display());
			}
		};
	}

	while let Some(cmd) = rx.recv().await {
		match cmd {
			Command::AddDevice { description, preferred_id, reply } => {
				let id = state.add_device(description, preferred_id);
				persist!();
				let _ = reply.send(Ok(id));
			}
			Command::RemoveDevice { id, reply } => {
				let result = state.remove_device(&id);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::ListDevices { reply } => {
				let _ = reply.send(state.list_devices());
			}
			Command::Description { id, reply } => {
				let _ = reply.send(state.description(&id));
			}
			Command::SetDescription { id, description, reply } => {
				let result = state.set_description(&id, description);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::Formats { id, reply } => {
				let _ = reply.send(state.formats(&id));
			}
			Command::SetFormats { id, formats, reply } => {
				let result = state.set_formats(&id, formats);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::AddFormat { id, format, index, reply } => {
				let result = state.add_format(&id, format, index);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::RemoveFormat { id, index, reply } => {
				let result = state.remove_format(&id, index);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::ControlValue { id, key, reply } => {
				let _ = reply.send(state.control_value(&id, &key));
			}
			Command::SetControlValue { id, key, value, reply } => {
				let result = state.set_control_value(&id, &key, value);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
			Command::AllControls { id, reply } => {
				let _ = reply.send(state.all_controls(&id));
			}
			Command::Picture { reply } => {
				let _ = reply.send(state.picture.clone());
			}
			Command::SetPicture { path: new_path, reply } => {
				state.picture = new_path;
				persist!();
				let _ = reply.send(Ok(()));
			}
			Command::LogLevel { reply } => {
				let _ = reply.send(state.log_level);
			}
			Command::SetLogLevel { level, reply } => {
				state.log_level = level;
				persist!();
				let _ = reply.send(Ok(()));
			}
			Command::DirectMode { id, reply } => {
				let _ = reply.send(state.direct_mode(&id));
			}
			Command::SetDirectMode { id, value, reply } => {
				let result = state.set_direct_mode(&id, value);
				if result.is_ok() {
					persist!();
				}
				let _ = reply.send(result);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn add_list_remove_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("prefs.ini");
		let store = PreferencesStore::open(path.clone()).await.unwrap();

		let id = store.add_device("Cam A".to_string(), None).await.unwrap();
		assert_eq!(store.list_devices().await, vec![id.clone()]);

		store.remove_device(&id).await.unwrap();
		assert!(store.list_devices().await.is_empty());
		assert!(path.exists());
	}

	#[tokio::test]
	async fn writes_are_durable_across_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("prefs.ini");
		{
			let store = PreferencesStore::open(path.clone()).await.unwrap();
			store.add_device("Cam A".to_string(), Some("Cam0".to_string())).await.unwrap();
		}

		let reopened = PreferencesStore::open(path).await.unwrap();
		assert_eq!(reopened.list_devices().await, vec!["Cam0".to_string()]);
	}
}
