use serde::{Deserialize, Serialize};

/// Closed set of pixel format tags. Values are part of the wire format
/// (spec §6) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
	Rgb32 = 0x0000_0001,
	Rgb24 = 0x0000_0002,
	Rgb16_565 = 0x0000_0003,
	Rgb15_555 = 0x0000_0004,
	Uyvy422 = 0x0000_0010,
	Yuyv422 = 0x0000_0011,
	Nv12 = 0x0000_0020,
}

impl PixelFormat {
	pub const ALL: [PixelFormat; 7] = [
		PixelFormat::Rgb32,
		PixelFormat::Rgb24,
		PixelFormat::Rgb16_565,
		PixelFormat::Rgb15_555,
		PixelFormat::Uyvy422,
		PixelFormat::Yuyv422,
		PixelFormat::Nv12,
	];

	pub fn tag(self) -> u32 {
		self as u32
	}

	pub fn is_rgb_family(self) -> bool {
		matches!(
			self,
			PixelFormat::Rgb32 | PixelFormat::Rgb24 | PixelFormat::Rgb16_565 | PixelFormat::Rgb15_555
		)
	}

	pub fn is_yuv_family(self) -> bool {
		!self.is_rgb_family()
	}

	pub fn planes(self) -> u32 {
		match self {
			PixelFormat::Nv12 => 2,
			_ => 1,
		}
	}

	/// Bytes per pixel for packed formats. Meaningless for biplanar formats;
	/// use `line_size`/`plane_offset` there instead.
	pub fn bpp(self) -> u32 {
		match self {
			PixelFormat::Rgb32 => 4,
			PixelFormat::Rgb24 => 3,
			PixelFormat::Rgb16_565 | PixelFormat::Rgb15_555 => 2,
			PixelFormat::Uyvy422 | PixelFormat::Yuyv422 => 2,
			PixelFormat::Nv12 => 1,
		}
	}

	/// Bytes in one row of `plane` for a frame of the given `width`.
	pub fn line_size(self, _plane: u32, width: u32) -> u32 {
		match self {
			// Luma plane: 1 byte/px. Chroma plane: half as many samples but 2
			// interleaved bytes each, so the row byte count is `width` either way.
			PixelFormat::Nv12 => width,
			_ => width * self.bpp(),
		}
	}

	/// Byte offset of `plane` within the packed buffer.
	pub fn plane_offset(self, plane: u32, width: u32, height: u32) -> u32 {
		match self {
			PixelFormat::Nv12 if plane == 1 => self.line_size(0, width) * height,
			_ => 0,
		}
	}

	/// Total payload size in bytes for a frame of the given dimensions.
	pub fn total_size(self, width: u32, height: u32) -> u32 {
		match self {
			PixelFormat::Nv12 => {
				let luma = self.line_size(0, width) * height;
				let chroma_height = height.div_ceil(2);
				let chroma = self.line_size(1, width) * chroma_height;
				luma + chroma
			}
			_ => self.line_size(0, width) * height,
		}
	}
}

impl TryFrom<u32> for PixelFormat {
	type Error = crate::error::Error;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		PixelFormat::ALL
			.into_iter()
			.find(|f| f.tag() == value)
			.ok_or_else(|| crate::error::Error::InvalidArgument(format!("unknown pixel format tag {value:#x}")))
	}
}

/// Rational frame rate, `num/den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
	pub num: u32,
	pub den: u32,
}

impl Fraction {
	pub fn new(num: u32, den: u32) -> Self {
		Self { num, den }
	}

	pub fn is_valid(self) -> bool {
		self.num >= 1 && self.den >= 1
	}

	pub fn as_f64(self) -> f64 {
		f64::from(self.num) / f64::from(self.den)
	}
}

impl std::fmt::Display for Fraction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.num, self.den)
	}
}

/// `(pixel_format, width, height, fps)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
	pub pixel_format: PixelFormat,
	pub width: u32,
	pub height: u32,
	pub fps: Fraction,
}

impl VideoFormat {
	pub fn new(pixel_format: PixelFormat, width: u32, height: u32, fps: Fraction) -> Self {
		Self { pixel_format, width, height, fps }
	}

	pub fn is_valid(&self) -> bool {
		self.width >= 1 && self.height >= 1 && self.fps.is_valid()
	}

	pub fn bpp(&self) -> u32 {
		self.pixel_format.bpp()
	}

	pub fn line_size(&self, plane: u32) -> u32 {
		self.pixel_format.line_size(plane, self.width)
	}

	pub fn plane_offset(&self, plane: u32) -> u32 {
		self.pixel_format.plane_offset(plane, self.width, self.height)
	}

	pub fn total_size(&self) -> u32 {
		self.pixel_format.total_size(self.width, self.height)
	}

	/// Rounds `width` up to the nearest 32-pixel alignment.
	pub fn aligned_width(&self) -> u32 {
		self.width.div_ceil(32) * 32
	}

	/// Picks the candidate in `candidates` closest to `self` under a
	/// `(width, height, fps)` Euclidean-like distance; ties broken by the
	/// earliest entry in `candidates`.
	pub fn nearest(&self, candidates: &[VideoFormat]) -> Option<VideoFormat> {
		candidates
			.iter()
			.copied()
			.min_by(|a, b| self.distance(a).partial_cmp(&self.distance(b)).unwrap())
	}

	fn distance(&self, other: &VideoFormat) -> f64 {
		let dw = f64::from(self.width) - f64::from(other.width);
		let dh = f64::from(self.height) - f64::from(other.height);
		let df = self.fps.as_f64() - other.fps.as_f64();
		(dw * dw + dh * dh + df * df).sqrt()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rgb24_sizes() {
		let fmt = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		assert_eq!(fmt.total_size(), 640 * 480 * 3);
		assert_eq!(fmt.line_size(0), 640 * 3);
	}

	#[test]
	fn nv12_sizes() {
		let fmt = VideoFormat::new(PixelFormat::Nv12, 1280, 720, Fraction::new(30, 1));
		assert_eq!(fmt.total_size(), 1280 * 720 + 1280 * 360);
	}

	#[test]
	fn nearest_singleton_is_identity() {
		let fmt = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		assert_eq!(fmt.nearest(&[fmt]), Some(fmt));
	}

	#[test]
	fn nearest_tiebreak_is_first_in_list() {
		let target = VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1));
		let a = VideoFormat::new(PixelFormat::Rgb24, 600, 480, Fraction::new(30, 1));
		let b = VideoFormat::new(PixelFormat::Rgb24, 680, 480, Fraction::new(30, 1));
		assert_eq!(target.nearest(&[a, b]), Some(a));
	}
}
