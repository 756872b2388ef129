//! Control-protocol message catalog and `AKCP` wire framing (C4).
//!
//! The header shape (`message_id`/`flags`/`correlation_id` read first,
//! then exactly `body_len` further bytes) and the `#[repr(u16)]` +
//! `TryFrom<u16>` message-tag idiom are grounded on
//! `session/stream/control/mod.rs`'s `ControlMessageType`; this protocol
//! has no encryption layer so the body is just the record bytes.

pub mod codec;

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::frame::format::{Fraction, PixelFormat, VideoFormat};

pub const MAGIC: u32 = 0x414B_4350; // "AKCP"
pub const HEADER_SIZE: usize = 16;
pub const FLAG_REPLY: u16 = 0x0001;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
	Hello = 1,
	Bye = 2,
	ListDevices = 3,
	DeviceInfo = 4,
	AddDevice = 5,
	RemoveDevice = 6,
	UpdateDevices = 7,
	SetFormats = 8,
	StartBroadcast = 9,
	StopBroadcast = 10,
	AddListener = 11,
	RemoveListener = 12,
	GetControls = 13,
	SetControls = 14,
	Ping = 15,
	DevicesChanged = 100,
	BroadcastingChanged = 101,
	PictureChanged = 102,
	ControlsChanged = 103,
	ListenerAdded = 104,
	ListenerRemoved = 105,
}

impl TryFrom<u16> for MessageId {
	type Error = Error;

	fn try_from(value: u16) -> Result<Self> {
		use MessageId::*;
		Ok(match value {
			1 => Hello,
			2 => Bye,
			3 => ListDevices,
			4 => DeviceInfo,
			5 => AddDevice,
			6 => RemoveDevice,
			7 => UpdateDevices,
			8 => SetFormats,
			9 => StartBroadcast,
			10 => StopBroadcast,
			11 => AddListener,
			12 => RemoveListener,
			13 => GetControls,
			14 => SetControls,
			15 => Ping,
			100 => DevicesChanged,
			101 => BroadcastingChanged,
			102 => PictureChanged,
			103 => ControlsChanged,
			104 => ListenerAdded,
			105 => ListenerRemoved,
			other => return Err(Error::Transport(format!("unknown message id {other}"))),
		})
	}
}

/// A decoded frame: header fields plus the still-opaque body, ready for
/// a typed `Request`/`Reply`/`Notification` decode keyed on `message_id`.
#[derive(Debug, Clone)]
pub struct Frame {
	pub message_id: MessageId,
	pub flags: u16,
	pub correlation_id: u32,
	pub body: Vec<u8>,
}

impl Frame {
	pub fn is_reply(&self) -> bool {
		self.flags & FLAG_REPLY != 0
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
		out.extend_from_slice(&MAGIC.to_le_bytes());
		out.extend_from_slice(&(self.message_id as u16).to_le_bytes());
		out.extend_from_slice(&self.flags.to_le_bytes());
		out.extend_from_slice(&self.correlation_id.to_le_bytes());
		out.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
		out.extend_from_slice(&self.body);
		out
	}
}

/// Requests, always peer → broker except `Ping` (broker → peer).
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
	Hello { role: String, suggested_name: String },
	Bye { peer_id: String },
	ListDevices,
	DeviceInfo { device_id: String },
	AddDevice { description: String, preferred_id: Option<String> },
	RemoveDevice { device_id: String },
	UpdateDevices,
	SetFormats { device_id: String, formats: Vec<VideoFormat> },
	StartBroadcast { device_id: String, format: VideoFormat },
	StopBroadcast { device_id: String },
	AddListener { device_id: String },
	RemoveListener { device_id: String },
	GetControls { device_id: String },
	SetControls { device_id: String, controls: BTreeMap<String, i32> },
	Ping,
}

impl Request {
	pub fn message_id(&self) -> MessageId {
		match self {
			Request::Hello { .. } => MessageId::Hello,
			Request::Bye { .. } => MessageId::Bye,
			Request::ListDevices => MessageId::ListDevices,
			Request::DeviceInfo { .. } => MessageId::DeviceInfo,
			Request::AddDevice { .. } => MessageId::AddDevice,
			Request::RemoveDevice { .. } => MessageId::RemoveDevice,
			Request::UpdateDevices => MessageId::UpdateDevices,
			Request::SetFormats { .. } => MessageId::SetFormats,
			Request::StartBroadcast { .. } => MessageId::StartBroadcast,
			Request::StopBroadcast { .. } => MessageId::StopBroadcast,
			Request::AddListener { .. } => MessageId::AddListener,
			Request::RemoveListener { .. } => MessageId::RemoveListener,
			Request::GetControls { .. } => MessageId::GetControls,
			Request::SetControls { .. } => MessageId::SetControls,
			Request::Ping => MessageId::Ping,
		}
	}

	pub fn encode_body(&self) -> Vec<u8> {
		let mut w = Writer::default();
		match self {
			Request::Hello { role, suggested_name } => {
				w.string(role);
				w.string(suggested_name);
			}
			Request::Bye { peer_id } => w.string(peer_id),
			Request::ListDevices | Request::UpdateDevices | Request::Ping => {}
			Request::DeviceInfo { device_id }
			| Request::RemoveDevice { device_id }
			| Request::StopBroadcast { device_id }
			| Request::AddListener { device_id }
			| Request::RemoveListener { device_id }
			| Request::GetControls { device_id } => w.string(device_id),
			Request::AddDevice { description, preferred_id } => {
				w.string(description);
				w.option_string(preferred_id.as_deref());
			}
			Request::SetFormats { device_id, formats } => {
				w.string(device_id);
				w.formats(formats);
			}
			Request::StartBroadcast { device_id, format } => {
				w.string(device_id);
				w.format(*format);
			}
			Request::SetControls { device_id, controls } => {
				w.string(device_id);
				w.controls(controls);
			}
		}
		w.into_bytes()
	}

	pub fn decode(message_id: MessageId, body: &[u8]) -> Result<Self> {
		let mut r = Reader::new(body);
		Ok(match message_id {
			MessageId::Hello => Request::Hello { role: r.string()?, suggested_name: r.string()? },
			MessageId::Bye => Request::Bye { peer_id: r.string()? },
			MessageId::ListDevices => Request::ListDevices,
			MessageId::DeviceInfo => Request::DeviceInfo { device_id: r.string()? },
			MessageId::AddDevice => Request::AddDevice { description: r.string()?, preferred_id: r.option_string()? },
			MessageId::RemoveDevice => Request::RemoveDevice { device_id: r.string()? },
			MessageId::UpdateDevices => Request::UpdateDevices,
			MessageId::SetFormats => Request::SetFormats { device_id: r.string()?, formats: r.formats()? },
			MessageId::StartBroadcast => Request::StartBroadcast { device_id: r.string()?, format: r.format()? },
			MessageId::StopBroadcast => Request::StopBroadcast { device_id: r.string()? },
			MessageId::AddListener => Request::AddListener { device_id: r.string()? },
			MessageId::RemoveListener => Request::RemoveListener { device_id: r.string()? },
			MessageId::GetControls => Request::GetControls { device_id: r.string()? },
			MessageId::SetControls => Request::SetControls { device_id: r.string()?, controls: r.controls()? },
			MessageId::Ping => Request::Ping,
			other => return Err(Error::Transport(format!("{other:?} is not a request"))),
		})
	}
}

/// Replies, broker → peer, paired with a request via `correlation_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
	Hello { peer_id: String, server_version: String },
	Ack,
	DeviceId(String),
	ListDevices(Vec<String>),
	DeviceInfo { description: String, formats: Vec<VideoFormat>, broadcaster: Option<String>, listener_count: u32 },
	Controls(BTreeMap<String, i32>),
	Alive,
	Error { code: u16, message: String },
}

impl Reply {
	pub fn encode_body(&self) -> Vec<u8> {
		let mut w = Writer::default();
		match self {
			Reply::Hello { peer_id, server_version } => {
				w.string(peer_id);
				w.string(server_version);
			}
			Reply::Ack | Reply::Alive => {}
			Reply::DeviceId(id) => w.string(id),
			Reply::ListDevices(ids) => w.string_list(ids),
			Reply::DeviceInfo { description, formats, broadcaster, listener_count } => {
				w.string(description);
				w.formats(formats);
				w.option_string(broadcaster.as_deref());
				w.u32(*listener_count);
			}
			Reply::Controls(map) => w.controls(map),
			Reply::Error { code, message } => {
				w.buf.push(ERROR_SENTINEL);
				w.u16(*code);
				w.string(message);
			}
		}
		w.into_bytes()
	}

	/// Decodes a reply body; the caller supplies which request it answers
	/// since reply shape depends on that, not on a separate reply tag.
	pub fn decode(for_request: MessageId, body: &[u8]) -> Result<Self> {
		let mut r = Reader::new(body);
		if r.peek_error() {
			r.take(1)?;
			let code = r.u16()?;
			let message = r.string()?;
			return Ok(Reply::Error { code, message });
		}
		Ok(match for_request {
			MessageId::Hello => Reply::Hello { peer_id: r.string()?, server_version: r.string()? },
			MessageId::AddDevice => Reply::DeviceId(r.string()?),
			MessageId::ListDevices => Reply::ListDevices(r.string_list()?),
			MessageId::DeviceInfo => Reply::DeviceInfo {
				description: r.string()?,
				formats: r.formats()?,
				broadcaster: r.option_string()?,
				listener_count: r.u32()?,
			},
			MessageId::GetControls => Reply::Controls(r.controls()?),
			MessageId::Ping => Reply::Alive,
			_ => Reply::Ack,
		})
	}
}

/// Notifications, broker → all interested peers, no reply expected.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
	DevicesChanged(Vec<String>),
	BroadcastingChanged { device_id: String, broadcaster: Option<String> },
	PictureChanged { path: String },
	ControlsChanged { device_id: String, controls: BTreeMap<String, i32> },
	ListenerAdded { device_id: String, peer_id: String },
	ListenerRemoved { device_id: String, peer_id: String },
}

impl Notification {
	pub fn message_id(&self) -> MessageId {
		match self {
			Notification::DevicesChanged(_) => MessageId::DevicesChanged,
			Notification::BroadcastingChanged { .. } => MessageId::BroadcastingChanged,
			Notification::PictureChanged { .. } => MessageId::PictureChanged,
			Notification::ControlsChanged { .. } => MessageId::ControlsChanged,
			Notification::ListenerAdded { .. } => MessageId::ListenerAdded,
			Notification::ListenerRemoved { .. } => MessageId::ListenerRemoved,
		}
	}

	pub fn encode_body(&self) -> Vec<u8> {
		let mut w = Writer::default();
		match self {
			Notification::DevicesChanged(ids) => w.string_list(ids),
			Notification::BroadcastingChanged { device_id, broadcaster } => {
				w.string(device_id);
				w.option_string(broadcaster.as_deref());
			}
			Notification::PictureChanged { path } => w.string(path),
			Notification::ControlsChanged { device_id, controls } => {
				w.string(device_id);
				w.controls(controls);
			}
			Notification::ListenerAdded { device_id, peer_id } | Notification::ListenerRemoved { device_id, peer_id } => {
				w.string(device_id);
				w.string(peer_id);
			}
		}
		w.into_bytes()
	}

	pub fn decode(message_id: MessageId, body: &[u8]) -> Result<Self> {
		let mut r = Reader::new(body);
		Ok(match message_id {
			MessageId::DevicesChanged => Notification::DevicesChanged(r.string_list()?),
			MessageId::BroadcastingChanged => {
				Notification::BroadcastingChanged { device_id: r.string()?, broadcaster: r.option_string()? }
			}
			MessageId::PictureChanged => Notification::PictureChanged { path: r.string()? },
			MessageId::ControlsChanged => Notification::ControlsChanged { device_id: r.string()?, controls: r.controls()? },
			MessageId::ListenerAdded => Notification::ListenerAdded { device_id: r.string()?, peer_id: r.string()? },
			MessageId::ListenerRemoved => Notification::ListenerRemoved { device_id: r.string()?, peer_id: r.string()? },
			other => return Err(Error::Transport(format!("{other:?} is not a notification"))),
		})
	}
}

#[derive(Default)]
struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	fn into_bytes(self) -> Vec<u8> {
		self.buf
	}

	fn u16(&mut self, v: u16) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn u32(&mut self, v: u32) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn i32(&mut self, v: i32) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn string(&mut self, s: &str) {
		self.u32(s.len() as u32);
		self.buf.extend_from_slice(s.as_bytes());
	}

	fn option_string(&mut self, s: Option<&str>) {
		match s {
			Some(s) => {
				self.buf.push(1);
				self.string(s);
			}
			None => self.buf.push(0),
		}
	}

	fn string_list(&mut self, items: &[String]) {
		self.u32(items.len() as u32);
		for item in items {
			self.string(item);
		}
	}

	fn controls(&mut self, map: &BTreeMap<String, i32>) {
		self.u32(map.len() as u32);
		for (k, v) in map {
			self.string(k);
			self.i32(*v);
		}
	}

	fn format(&mut self, format: VideoFormat) {
		self.u32(format.pixel_format.tag());
		self.u32(format.width);
		self.u32(format.height);
		self.u32(format.fps.num);
		self.u32(format.fps.den);
	}

	fn formats(&mut self, formats: &[VideoFormat]) {
		self.u32(formats.len() as u32);
		for format in formats {
			self.format(*format);
		}
	}
}

/// Cursor-based reader over a message body. Byte 0 of an error reply body
/// is a sentinel `0xFF` not reachable from any successful reply's first
/// field (every successful reply either starts with a length-prefixed
/// string, whose first byte is a length and near-certainly not `0xFF` for
/// realistic bodies, or is empty) — `peek_error` checks that sentinel.
struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

const ERROR_SENTINEL: u8 = 0xFF;

impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn peek_error(&self) -> bool {
		self.buf.first() == Some(&ERROR_SENTINEL)
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8]> {
		if self.pos + len > self.buf.len() {
			return Err(Error::Corrupted("message body truncated".into()));
		}
		let slice = &self.buf[self.pos..self.pos + len];
		self.pos += len;
		Ok(slice)
	}

	fn u16(&mut self) -> Result<u16> {
		Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
	}

	fn u32(&mut self) -> Result<u32> {
		Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	fn i32(&mut self) -> Result<i32> {
		Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	fn string(&mut self) -> Result<String> {
		let len = self.u32()? as usize;
		let bytes = self.take(len)?;
		String::from_utf8(bytes.to_vec()).map_err(|e| Error::Corrupted(format!("invalid utf-8 in string field: {e}")))
	}

	fn option_string(&mut self) -> Result<Option<String>> {
		match self.take(1)?[0] {
			0 => Ok(None),
			_ => Ok(Some(self.string()?)),
		}
	}

	fn string_list(&mut self) -> Result<Vec<String>> {
		let len = self.u32()? as usize;
		(0..len).map(|_| self.string()).collect()
	}

	fn controls(&mut self) -> Result<BTreeMap<String, i32>> {
		let len = self.u32()? as usize;
		let mut map = BTreeMap::new();
		for _ in 0..len {
			let key = self.string()?;
			let value = self.i32()?;
			map.insert(key, value);
		}
		Ok(map)
	}

	fn format(&mut self) -> Result<VideoFormat> {
		let tag = self.u32()?;
		let width = self.u32()?;
		let height = self.u32()?;
		let fps_num = self.u32()?;
		let fps_den = self.u32()?;
		Ok(VideoFormat::new(PixelFormat::try_from(tag)?, width, height, Fraction::new(fps_num, fps_den)))
	}

	fn formats(&mut self) -> Result<Vec<VideoFormat>> {
		let len = self.u32()? as usize;
		(0..len).map(|_| self.format()).collect()
	}
}

/// Encodes an error reply with the sentinel byte `decode` checks for.
pub fn error_reply_body(code: u16, message: &str) -> Vec<u8> {
	let mut buf = vec![ERROR_SENTINEL];
	buf.extend_from_slice(&code.to_le_bytes());
	buf.extend_from_slice(&(message.len() as u32).to_le_bytes());
	buf.extend_from_slice(message.as_bytes());
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_round_trips() {
		let req = Request::SetFormats {
			device_id: "Cam0".to_string(),
			formats: vec![VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1))],
		};
		let body = req.encode_body();
		let decoded = Request::decode(req.message_id(), &body).unwrap();
		assert_eq!(req, decoded);
	}

	#[test]
	fn reply_round_trips() {
		let reply = Reply::DeviceInfo {
			description: "Cam A".to_string(),
			formats: vec![VideoFormat::new(PixelFormat::Nv12, 1280, 720, Fraction::new(30, 1))],
			broadcaster: Some("peer-1".to_string()),
			listener_count: 2,
		};
		let body = reply.encode_body();
		let decoded = Reply::decode(MessageId::DeviceInfo, &body).unwrap();
		assert_eq!(reply, decoded);
	}

	#[test]
	fn error_reply_round_trips() {
		let body = error_reply_body(2, "device busy");
		let decoded = Reply::decode(MessageId::StartBroadcast, &body).unwrap();
		assert_eq!(decoded, Reply::Error { code: 2, message: "device busy".to_string() });
	}

	#[test]
	fn notification_round_trips() {
		let notif = Notification::BroadcastingChanged { device_id: "Cam0".to_string(), broadcaster: None };
		let body = notif.encode_body();
		let decoded = Notification::decode(notif.message_id(), &body).unwrap();
		assert_eq!(notif, decoded);
	}

	#[test]
	fn frame_header_round_trips() {
		let frame = Frame { message_id: MessageId::Ping, flags: FLAG_REPLY, correlation_id: 42, body: vec![1, 2, 3] };
		let bytes = frame.encode();
		assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
		assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), MessageId::Ping as u16);
	}
}
