use crate::error::{Error, Result};
use crate::frame::format::{Fraction, PixelFormat, VideoFormat};

/// `(VideoFormat, byte buffer)`. Value type; copies are explicit via
/// `Clone`, transformations always return a new frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
	pub format: VideoFormat,
	pub data: Vec<u8>,
}

impl VideoFrame {
	/// An empty frame, returned by failed operations instead of panicking.
	pub fn empty() -> Self {
		Self {
			format: VideoFormat::new(PixelFormat::Rgb24, 0, 0, Fraction::new(1, 1)),
			data: Vec::new(),
		}
	}

	pub fn is_valid(&self) -> bool {
		self.format.is_valid() && self.data.len() == self.format.total_size() as usize
	}

	/// A zeroed frame of `format`, or an empty frame if `format` is invalid.
	pub fn from_format(format: VideoFormat) -> Self {
		if !format.is_valid() {
			return Self::empty();
		}

		Self { format, data: vec![0u8; format.total_size() as usize] }
	}

	/// Bytes of `plane`, bounds-checked against the frame's declared size.
	pub fn plane(&self, plane: u32) -> &[u8] {
		let start = self.format.plane_offset(plane) as usize;
		let height = if plane == 0 || self.format.pixel_format != PixelFormat::Nv12 {
			self.format.height
		} else {
			self.format.height.div_ceil(2)
		};
		let len = (self.format.line_size(plane) * height) as usize;
		let end = (start + len).min(self.data.len());
		&self.data[start.min(self.data.len())..end]
	}

	/// Loads a frame from an uncompressed BMP file (24 or 32 bit, bottom-up
	/// rows). This is the only hand-rolled decoder; PNG/JPEG go through
	/// [`Self::from_picture_file`].
	pub fn from_bmp_file(path: &std::path::Path) -> Result<Self> {
		let bytes = std::fs::read(path)?;
		Self::from_bmp_bytes(&bytes)
	}

	pub fn from_bmp_bytes(bytes: &[u8]) -> Result<Self> {
		if bytes.len() < 54 || &bytes[0..2] != b"BM" {
			return Err(Error::InvalidArgument("not a BMP file".into()));
		}

		let pixel_offset = u32::from_le_bytes(bytes[10..14].try_into().unwrap()) as usize;
		let dib_header_size = u32::from_le_bytes(bytes[14..18].try_into().unwrap());
		if dib_header_size < 40 {
			return Err(Error::Unsupported("BMP core headers are not supported".into()));
		}

		let width = i32::from_le_bytes(bytes[18..22].try_into().unwrap());
		let height_raw = i32::from_le_bytes(bytes[22..26].try_into().unwrap());
		let bpp = u16::from_le_bytes(bytes[28..30].try_into().unwrap());
		let compression = u32::from_le_bytes(bytes[30..34].try_into().unwrap());

		if compression != 0 {
			return Err(Error::Unsupported("compressed BMP is not supported".into()));
		}
		if width <= 0 {
			return Err(Error::InvalidArgument("invalid BMP width".into()));
		}

		let width = width as u32;
		let (height, bottom_up) = if height_raw < 0 { ((-height_raw) as u32, false) } else { (height_raw as u32, true) };

		let src_bpp = match bpp {
			24 => 3,
			32 => 4,
			other => return Err(Error::Unsupported(format!("{other}-bit BMP is not supported"))),
		};

		let row_stride = (width * src_bpp).div_ceil(4) as usize * 4;
		let format = VideoFormat::new(
			if src_bpp == 4 { PixelFormat::Rgb32 } else { PixelFormat::Rgb24 },
			width,
			height,
			Fraction::new(1, 1),
		);
		let mut frame = VideoFrame::from_format(format);
		let dst_stride = format.line_size(0) as usize;

		for y in 0..height as usize {
			let src_row = if bottom_up { height as usize - 1 - y } else { y };
			let src_start = pixel_offset + src_row * row_stride;
			let src_end = src_start + width as usize * src_bpp as usize;
			if src_end > bytes.len() {
				return Err(Error::InvalidArgument("BMP pixel data truncated".into()));
			}
			let dst_start = y * dst_stride;
			frame.data[dst_start..dst_start + width as usize * src_bpp as usize]
				.copy_from_slice(&bytes[src_start..src_end]);
		}

		Ok(frame)
	}

	/// Decodes any image the `image` crate understands (PNG/JPEG included)
	/// and normalizes it to `RGB24`. A thin wrapper, per the non-goal that
	/// only uncompressed BMP-class decode is hand-rolled.
	pub fn from_picture_file(path: &std::path::Path) -> Result<Self> {
		let img = image::open(path).map_err(|e| Error::InvalidArgument(e.to_string()))?.to_rgb8();
		let (width, height) = (img.width(), img.height());
		let format = VideoFormat::new(PixelFormat::Rgb24, width, height, Fraction::new(1, 1));
		Ok(Self { format, data: img.into_raw() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_bmp_24(width: u32, height: u32, fill: u8) -> Vec<u8> {
		let row_stride = (width * 3).div_ceil(4) as usize * 4;
		let pixel_data_size = row_stride * height as usize;
		let file_size = 54 + pixel_data_size;
		let mut out = vec![0u8; file_size];
		out[0..2].copy_from_slice(b"BM");
		out[2..6].copy_from_slice(&(file_size as u32).to_le_bytes());
		out[10..14].copy_from_slice(&54u32.to_le_bytes());
		out[14..18].copy_from_slice(&40u32.to_le_bytes());
		out[18..22].copy_from_slice(&(width as i32).to_le_bytes());
		out[22..26].copy_from_slice(&(height as i32).to_le_bytes());
		out[26..28].copy_from_slice(&1u16.to_le_bytes());
		out[28..30].copy_from_slice(&24u16.to_le_bytes());
		for b in &mut out[54..] {
			*b = fill;
		}
		out
	}

	#[test]
	fn decodes_uncompressed_bmp() {
		let bytes = write_bmp_24(4, 2, 0x55);
		let frame = VideoFrame::from_bmp_bytes(&bytes).unwrap();
		assert_eq!(frame.format.pixel_format, PixelFormat::Rgb24);
		assert_eq!(frame.format.width, 4);
		assert_eq!(frame.format.height, 2);
		assert!(frame.data.iter().all(|&b| b == 0x55));
	}

	#[test]
	fn rejects_non_bmp() {
		assert!(VideoFrame::from_bmp_bytes(&[0u8; 64]).is_err());
	}
}
