use std::fmt;

/// Crate-wide error taxonomy. Variants map 1:1 onto the wire error-code set
/// returned to peers by the control protocol.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("no such {what}: {id}")]
	NotFound { what: &'static str, id: String },

	#[error("device {device_id} is already broadcasting (held by {holder})")]
	Busy { device_id: String, holder: String },

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("timed out waiting for {0}")]
	Timeout(&'static str),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("corrupted: {0}")]
	Corrupted(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("unsupported: {0}")]
	Unsupported(String),
}

/// Stable wire error codes. Order and values are part of the control
/// protocol and must not be reordered once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
	Ok = 0,
	NotFound = 1,
	Busy = 2,
	InvalidArgument = 3,
	Timeout = 4,
	Transport = 5,
	Corrupted = 6,
	Io = 7,
	Unsupported = 8,
}

impl Error {
	pub fn code(&self) -> ErrorCode {
		match self {
			Error::NotFound { .. } => ErrorCode::NotFound,
			Error::Busy { .. } => ErrorCode::Busy,
			Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
			Error::Timeout(_) => ErrorCode::Timeout,
			Error::Transport(_) => ErrorCode::Transport,
			Error::Corrupted(_) => ErrorCode::Corrupted,
			Error::Io(_) => ErrorCode::Io,
			Error::Unsupported(_) => ErrorCode::Unsupported,
		}
	}
}

impl TryFrom<u16> for ErrorCode {
	type Error = Error;

	fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
		match value {
			0 => Ok(ErrorCode::Ok),
			1 => Ok(ErrorCode::NotFound),
			2 => Ok(ErrorCode::Busy),
			3 => Ok(ErrorCode::InvalidArgument),
			4 => Ok(ErrorCode::Timeout),
			5 => Ok(ErrorCode::Transport),
			6 => Ok(ErrorCode::Corrupted),
			7 => Ok(ErrorCode::Io),
			8 => Ok(ErrorCode::Unsupported),
			other => Err(Error::Transport(format!("unknown error code {other}"))),
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

pub type Result<T> = std::result::Result<T, Error>;
