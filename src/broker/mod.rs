//! The broker service (C5): accepts control-protocol connections, owns
//! peer and per-device runtime state behind a single actor task, and
//! enforces the `Idle`/`Broadcasting` state machine (§4.5).
//!
//! Actor shape grounded on `session/manager.rs` (`SessionManagerInner`
//! owning state mutated only inside its command loop) and `clients.rs`
//! (`ClientManager`, peer-keyed map, oneshot reply per command). The
//! accept-loop-per-connection + `ShutdownManager` wiring is grounded on
//! `rtsp.rs`.

pub mod device;
pub mod peer;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_shutdown::ShutdownManager;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::preferences::PreferencesStore;
use crate::protocol::codec::{read_frame, write_frame};
use crate::protocol::{Frame, MessageId, Notification, Reply, Request, FLAG_REPLY};

use device::{DeviceRuntime, DeviceState};
use peer::Peer;

enum Command {
	Hello { role: String, suggested_name: String, outbox: mpsc::Sender<Frame>, reply: oneshot::Sender<(String, String)> },
	Dispatch { peer_id: String, request: Request, reply: oneshot::Sender<Reply> },
	Pong { peer_id: String, correlation_id: u32 },
	PeerDied { peer_id: String },
	Tick,
}

/// Config-derived knobs the actor loop needs, passed in once at spawn time
/// rather than threaded through every command (§3/§4.5).
struct RuntimeSettings {
	ping_missed_threshold: u32,
	idle_timeout: Duration,
}

#[derive(Clone)]
pub struct Broker {
	tx: mpsc::Sender<Command>,
}

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

impl Broker {
	/// Spawns the actor task and the connection-accept loop. Runs until
	/// `shutdown` is triggered.
	pub async fn serve(config: Config, prefs: PreferencesStore, shutdown: ShutdownManager<()>) -> Result<()> {
		let (tx, rx) = mpsc::channel(64);
		let broker = Broker { tx };

		let ping_interval = Duration::from_secs(config.ping_interval_secs.max(1));
		let settings = RuntimeSettings {
			ping_missed_threshold: config.ping_missed_threshold.max(2),
			idle_timeout: Duration::from_secs(config.idle_timeout_secs),
		};
		tokio::spawn(run(prefs, rx, settings));

		let ticker = broker.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(ping_interval);
			loop {
				interval.tick().await;
				if ticker.tx.send(Command::Tick).await.is_err() {
					break;
				}
			}
		});

		let endpoint = config.effective_endpoint();
		let listener = TcpListener::bind(&endpoint).await?;
		tracing::info!("broker listening on {endpoint}");

		let _ = shutdown
			.wrap_cancel(shutdown.wrap_trigger_shutdown((), async {
				loop {
					let (stream, addr) = match listener.accept().await {
						Ok(pair) => pair,
						Err(e) => {
							tracing::warn!("failed to accept connection: {e}");
							continue;
						}
					};
					tracing::debug!("accepted control connection from {addr}");
					tokio::spawn(handle_connection(broker.clone(), stream));
				}
			}))
			.await;

		Ok(())
	}

	async fn hello(&self, role: String, suggested_name: String, outbox: mpsc::Sender<Frame>) -> Result<(String, String)> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::Hello { role, suggested_name, outbox, reply })
			.await
			.map_err(|_| Error::Transport("broker actor is gone".into()))?;
		rx.await.map_err(|_| Error::Transport("broker actor dropped the reply".into()))
	}

	async fn dispatch(&self, peer_id: String, request: Request) -> Result<Reply> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::Dispatch { peer_id, request, reply })
			.await
			.map_err(|_| Error::Transport("broker actor is gone".into()))?;
		rx.await.map_err(|_| Error::Transport("broker actor dropped the reply".into()))
	}

	async fn pong(&self, peer_id: String, correlation_id: u32) {
		let _ = self.tx.send(Command::Pong { peer_id, correlation_id }).await;
	}

	async fn peer_died(&self, peer_id: String) {
		let _ = self.tx.send(Command::PeerDied { peer_id }).await;
	}
}

async fn handle_connection(broker: Broker, stream: TcpStream) {
	let (mut read_half, mut write_half) = stream.into_split();
	let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(32);

	let writer = tokio::spawn(async move {
		while let Some(frame) = outbox_rx.recv().await {
			if write_frame(&mut write_half, &frame).await.is_err() {
				break;
			}
		}
		let _ = write_half.shutdown().await;
	});

	let mut peer_id: Option<String> = None;

	loop {
		let frame = match read_frame(&mut read_half).await {
			Ok(frame) => frame,
			Err(_) => break,
		};

		if frame.is_reply() {
			if let (Some(id), MessageId::Ping) = (peer_id.clone(), frame.message_id) {
				broker.pong(id, frame.correlation_id).await;
			}
			continue;
		}

		if frame.message_id == MessageId::Hello {
			let Ok(Request::Hello { role, suggested_name }) = Request::decode(frame.message_id, &frame.body) else { break };
			let Ok((id, server_version)) = broker.hello(role, suggested_name, outbox_tx.clone()).await else { break };
			let reply = Reply::Hello { peer_id: id.clone(), server_version };
			peer_id = Some(id);
			let out = Frame { message_id: MessageId::Hello, flags: FLAG_REPLY, correlation_id: frame.correlation_id, body: reply.encode_body() };
			if outbox_tx.send(out).await.is_err() {
				break;
			}
			continue;
		}

		let Some(id) = peer_id.clone() else {
			break;
		};

		let reply = match Request::decode(frame.message_id, &frame.body) {
			Ok(request) => broker.dispatch(id, request).await.unwrap_or_else(|e| Reply::Error { code: e.code() as u16, message: e.to_string() }),
			Err(e) => Reply::Error { code: e.code() as u16, message: e.to_string() },
		};

		let out = Frame { message_id: frame.message_id, flags: FLAG_REPLY, correlation_id: frame.correlation_id, body: reply.encode_body() };
		if outbox_tx.send(out).await.is_err() {
			break;
		}
	}

	if let Some(id) = peer_id {
		broker.peer_died(id).await;
	}
	drop(outbox_tx);
	let _ = writer.await;
}

async fn run(prefs: PreferencesStore, mut rx: mpsc::Receiver<Command>, settings: RuntimeSettings) {
	let mut peers: HashMap<String, Peer> = HashMap::new();
	let mut devices: HashMap<String, DeviceRuntime> = HashMap::new();

	while let Some(cmd) = rx.recv().await {
		match cmd {
			Command::Hello { role, suggested_name, outbox, reply } => {
				let id = uuid::Uuid::new_v4().to_string();
				peers.insert(id.clone(), Peer::new(id.clone(), role, suggested_name, outbox));
				let _ = reply.send((id, SERVER_VERSION.to_string()));
			}

			Command::Dispatch { peer_id, request, reply } => {
				let result = handle_request(&prefs, &mut peers, &mut devices, &peer_id, request).await;
				let _ = reply.send(result.unwrap_or_else(|e| Reply::Error { code: e.code() as u16, message: e.to_string() }));
			}

			Command::Pong { peer_id, correlation_id } => {
				if let Some(peer) = peers.get_mut(&peer_id) {
					if peer.pending_ping_correlation == Some(correlation_id) {
						peer.missed_pings = 0;
						peer.pending_ping_correlation = None;
					}
				}
			}

			Command::PeerDied { peer_id } => {
				release_peer(&mut peers, &mut devices, &peer_id).await;
			}

			Command::Tick => {
				// Every tick without a pong counts toward the threshold, including
				// the one in which the ping was just sent, so a dead peer is
				// declared within `ping_missed_threshold` intervals of its last pong.
				let dead: Vec<String> = peers
					.iter_mut()
					.filter_map(|(id, peer)| {
						peer.missed_pings += 1;
						if peer.missed_pings >= settings.ping_missed_threshold {
							return Some(id.clone());
						}
						let correlation_id = rand::random::<u32>();
						peer.pending_ping_correlation = Some(correlation_id);
						let frame = Frame { message_id: MessageId::Ping, flags: 0, correlation_id, body: Vec::new() };
						let _ = peer.outbox.try_send(frame);
						None
					})
					.collect();

				for id in dead {
					release_peer(&mut peers, &mut devices, &id).await;
				}

				devices.retain(|_, device| !device.is_idle_and_unwatched() || device.last_activity.elapsed() < settings.idle_timeout);
			}
		}
	}

	tracing::debug!("broker actor stopped");
}

async fn release_peer(peers: &mut HashMap<String, Peer>, devices: &mut HashMap<String, DeviceRuntime>, peer_id: &str) {
	peers.remove(peer_id);

	let device_ids: Vec<String> = devices.keys().cloned().collect();
	for device_id in device_ids {
		let device = devices.get_mut(&device_id).unwrap();
		let was_broadcaster = device.broadcaster() == Some(peer_id);
		if was_broadcaster {
			device.state = DeviceState::Idle;
			device.active_format = None;
			device.touch();
			notify_all(peers, Notification::BroadcastingChanged { device_id: device_id.clone(), broadcaster: None });
		}
		if device.listeners.remove(peer_id) {
			device.touch();
			notify_all(peers, Notification::ListenerRemoved { device_id: device_id.clone(), peer_id: peer_id.to_string() });
		}
	}
}

fn notify_all(peers: &HashMap<String, Peer>, notification: Notification) {
	let frame = Frame { message_id: notification.message_id(), flags: 0, correlation_id: 0, body: notification.encode_body() };
	for peer in peers.values() {
		let _ = peer.outbox.try_send(frame.clone());
	}
}

async fn handle_request(
	prefs: &PreferencesStore,
	peers: &mut HashMap<String, Peer>,
	devices: &mut HashMap<String, DeviceRuntime>,
	peer_id: &str,
	request: Request,
) -> Result<Reply> {
	match request {
		Request::Hello { .. } => Err(Error::InvalidArgument("Hello already completed for this connection".into())),

		Request::Bye { .. } => Ok(Reply::Ack),

		Request::ListDevices => Ok(Reply::ListDevices(prefs.list_devices().await)),

		Request::DeviceInfo { device_id } => {
			let description = prefs.description(&device_id).await?;
			let formats = prefs.formats(&device_id).await?;
			let runtime = devices.entry(device_id.clone()).or_default();
			Ok(Reply::DeviceInfo {
				description,
				formats,
				broadcaster: runtime.broadcaster().map(str::to_string),
				listener_count: runtime.listeners.len() as u32,
			})
		}

		Request::AddDevice { description, preferred_id } => {
			let id = prefs.add_device(description, preferred_id).await?;
			notify_all(peers, Notification::DevicesChanged(prefs.list_devices().await));
			Ok(Reply::DeviceId(id))
		}

		Request::RemoveDevice { device_id } => {
			prefs.remove_device(&device_id).await?;
			devices.remove(&device_id);
			notify_all(peers, Notification::DevicesChanged(prefs.list_devices().await));
			Ok(Reply::Ack)
		}

		Request::UpdateDevices => Ok(Reply::Ack),

		Request::SetFormats { device_id, formats } => {
			prefs.set_formats(&device_id, formats).await?;
			Ok(Reply::Ack)
		}

		Request::StartBroadcast { device_id, format } => {
			let direct_mode = prefs.direct_mode(&device_id).await?;
			if direct_mode {
				let formats = prefs.formats(&device_id).await?;
				if !formats.contains(&format) {
					return Err(Error::InvalidArgument(format!("format not listed for device {device_id}")));
				}
			}

			let runtime = devices.entry(device_id.clone()).or_default();
			match runtime.broadcaster() {
				Some(holder) if holder == peer_id => {}
				Some(holder) => return Err(Error::Busy { device_id, holder: holder.to_string() }),
				None => {
					runtime.state = DeviceState::Broadcasting(peer_id.to_string());
					runtime.active_format = Some(format);
					runtime.touch();
					notify_all(peers, Notification::BroadcastingChanged { device_id, broadcaster: Some(peer_id.to_string()) });
				}
			}
			Ok(Reply::Ack)
		}

		Request::StopBroadcast { device_id } => {
			let runtime = devices.entry(device_id.clone()).or_default();
			if runtime.broadcaster() == Some(peer_id) {
				runtime.state = DeviceState::Idle;
				runtime.active_format = None;
				runtime.touch();
				notify_all(peers, Notification::BroadcastingChanged { device_id, broadcaster: None });
			}
			Ok(Reply::Ack)
		}

		Request::AddListener { device_id } => {
			let runtime = devices.entry(device_id.clone()).or_default();
			if runtime.listeners.insert(peer_id.to_string()) {
				runtime.touch();
				notify_all(peers, Notification::ListenerAdded { device_id, peer_id: peer_id.to_string() });
			}
			Ok(Reply::Ack)
		}

		Request::RemoveListener { device_id } => {
			let runtime = devices.entry(device_id.clone()).or_default();
			if runtime.listeners.remove(peer_id) {
				runtime.touch();
				notify_all(peers, Notification::ListenerRemoved { device_id, peer_id: peer_id.to_string() });
			}
			Ok(Reply::Ack)
		}

		Request::GetControls { device_id } => Ok(Reply::Controls(prefs.all_controls(&device_id).await?)),

		Request::SetControls { device_id, controls } => {
			for (key, value) in &controls {
				prefs.set_control_value(&device_id, key.clone(), *value).await?;
			}
			notify_all(peers, Notification::ControlsChanged { device_id, controls });
			Ok(Reply::Ack)
		}

		Request::Ping => Ok(Reply::Alive),
	}
}

#[allow(dead_code)]
fn connected_peer_ids(peers: &HashMap<String, Peer>) -> BTreeSet<String> {
	peers.keys().cloned().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::format::{Fraction, PixelFormat, VideoFormat};
	use std::time::Duration as StdDuration;
	use tokio::net::TcpStream;

	async fn spawn_broker() -> (String, tokio::task::JoinHandle<()>) {
		spawn_broker_with(|_| {}).await
	}

	async fn spawn_broker_with(customize: impl FnOnce(&mut Config)) -> (String, tokio::task::JoinHandle<()>) {
		let dir = tempfile::tempdir().unwrap();
		let prefs_path = dir.path().join("prefs.ini");
		let prefs = PreferencesStore::open(prefs_path).await.unwrap();

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);
		let mut config = Config { service_endpoint: addr.to_string(), ping_interval_secs: 60, ..Config::default() };
		customize(&mut config);

		let shutdown = ShutdownManager::new();
		let handle = tokio::spawn(async move {
			let _ = Broker::serve(config, prefs, shutdown).await;
		});
		tokio::time::sleep(StdDuration::from_millis(50)).await;
		(addr.to_string(), handle)
	}

	/// Reads frames until one is the reply for `correlation_id`, returning
	/// any notifications seen along the way (the broker may fan a
	/// notification out to the requester itself ahead of its own reply).
	async fn recv_reply(stream: &mut TcpStream, correlation_id: u32) -> (Frame, Vec<Notification>) {
		let mut notifications = Vec::new();
		loop {
			let frame = read_frame(stream).await.unwrap();
			if frame.is_reply() && frame.correlation_id == correlation_id {
				return (frame, notifications);
			}
			notifications.push(Notification::decode(frame.message_id, &frame.body).unwrap());
		}
	}

	async fn hello(stream: &mut TcpStream) -> String {
		let req = Request::Hello { role: "test".to_string(), suggested_name: "tester".to_string() };
		let frame = Frame { message_id: req.message_id(), flags: 0, correlation_id: 1, body: req.encode_body() };
		write_frame(stream, &frame).await.unwrap();
		let (reply_frame, _) = recv_reply(stream, 1).await;
		match Reply::decode(MessageId::Hello, &reply_frame.body).unwrap() {
			Reply::Hello { peer_id, .. } => peer_id,
			other => panic!("unexpected reply: {other:?}"),
		}
	}

	async fn call(stream: &mut TcpStream, request: Request, correlation_id: u32) -> Reply {
		let message_id = request.message_id();
		let frame = Frame { message_id, flags: 0, correlation_id, body: request.encode_body() };
		write_frame(stream, &frame).await.unwrap();
		let (reply_frame, _) = recv_reply(stream, correlation_id).await;
		Reply::decode(message_id, &reply_frame.body).unwrap()
	}

	#[tokio::test]
	async fn add_list_remove_device_end_to_end() {
		let (addr, _broker) = spawn_broker().await;
		let mut stream = TcpStream::connect(&addr).await.unwrap();
		hello(&mut stream).await;

		let reply = call(&mut stream, Request::AddDevice { description: "Cam A".to_string(), preferred_id: None }, 2).await;
		let Reply::DeviceId(id) = reply else { panic!("expected DeviceId") };

		let reply = call(&mut stream, Request::ListDevices, 3).await;
		assert_eq!(reply, Reply::ListDevices(vec![id.clone()]));

		let reply = call(&mut stream, Request::RemoveDevice { device_id: id }, 4).await;
		assert_eq!(reply, Reply::Ack);

		let reply = call(&mut stream, Request::ListDevices, 5).await;
		assert_eq!(reply, Reply::ListDevices(vec![]));
	}

	#[tokio::test]
	async fn second_broadcaster_is_rejected_as_busy() {
		let (addr, _broker) = spawn_broker().await;

		let mut producer1 = TcpStream::connect(&addr).await.unwrap();
		hello(&mut producer1).await;
		let Reply::DeviceId(device_id) =
			call(&mut producer1, Request::AddDevice { description: "Cam A".to_string(), preferred_id: None }, 2).await
		else {
			panic!("expected DeviceId")
		};

		let format = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		let reply = call(&mut producer1, Request::StartBroadcast { device_id: device_id.clone(), format }, 3).await;
		assert_eq!(reply, Reply::Ack);

		let mut producer2 = TcpStream::connect(&addr).await.unwrap();
		hello(&mut producer2).await;
		let reply = call(&mut producer2, Request::StartBroadcast { device_id, format }, 2).await;
		assert!(matches!(reply, Reply::Error { code, .. } if code == crate::error::ErrorCode::Busy as u16));
	}

	#[tokio::test]
	async fn listener_receives_broadcasting_changed_notification() {
		let (addr, _broker) = spawn_broker().await;

		let mut producer = TcpStream::connect(&addr).await.unwrap();
		let producer_id = hello(&mut producer).await;
		let Reply::DeviceId(device_id) =
			call(&mut producer, Request::AddDevice { description: "Cam A".to_string(), preferred_id: None }, 2).await
		else {
			panic!("expected DeviceId")
		};

		let mut consumer = TcpStream::connect(&addr).await.unwrap();
		hello(&mut consumer).await;
		let reply = call(&mut consumer, Request::AddListener { device_id: device_id.clone() }, 2).await;
		assert_eq!(reply, Reply::Ack);

		let format = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		call(&mut producer, Request::StartBroadcast { device_id: device_id.clone(), format }, 3).await;

		let notif_frame = read_frame(&mut consumer).await.unwrap();
		let notif = Notification::decode(notif_frame.message_id, &notif_frame.body).unwrap();
		assert_eq!(notif, Notification::BroadcastingChanged { device_id, broadcaster: Some(producer_id) });
	}

	#[tokio::test]
	async fn dead_broadcaster_is_released_within_ping_missed_threshold_intervals() {
		let (addr, _broker) = spawn_broker_with(|config| {
			config.ping_interval_secs = 1;
			config.ping_missed_threshold = 2;
		})
		.await;

		let mut producer = TcpStream::connect(&addr).await.unwrap();
		hello(&mut producer).await;
		let Reply::DeviceId(device_id) =
			call(&mut producer, Request::AddDevice { description: "Cam A".to_string(), preferred_id: None }, 2).await
		else {
			panic!("expected DeviceId")
		};
		let format = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		call(&mut producer, Request::StartBroadcast { device_id: device_id.clone(), format }, 3).await;

		let mut consumer = TcpStream::connect(&addr).await.unwrap();
		hello(&mut consumer).await;
		call(&mut consumer, Request::AddListener { device_id: device_id.clone() }, 2).await;

		drop(producer);

		let notif = tokio::time::timeout(StdDuration::from_secs(3), async {
			loop {
				let frame = read_frame(&mut consumer).await.unwrap();
				if frame.message_id == MessageId::BroadcastingChanged {
					return Notification::decode(frame.message_id, &frame.body).unwrap();
				}
			}
		})
		.await
		.expect("broadcaster death not detected within ping_missed_threshold intervals");

		assert_eq!(notif, Notification::BroadcastingChanged { device_id, broadcaster: None });
	}
}
