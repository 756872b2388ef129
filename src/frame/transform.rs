use crate::frame::buffer::VideoFrame;
use crate::frame::format::{PixelFormat, VideoFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
	Fast,
	Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatioMode {
	Ignore,
	Keep,
	Expanding,
}

impl VideoFrame {
	/// Pure byte/plane reorder; never converts pixel format. Involution:
	/// `mirror(h,v).mirror(h,v) == self`.
	pub fn mirror(&self, horizontal: bool, vertical: bool) -> VideoFrame {
		if !self.is_valid() {
			return VideoFrame::empty();
		}
		if !horizontal && !vertical {
			return self.clone();
		}

		let fmt = self.format;
		let mut out = VideoFrame::from_format(fmt);
		let width = fmt.width as usize;
		let height = fmt.height as usize;

		match fmt.pixel_format {
			PixelFormat::Rgb32 | PixelFormat::Rgb24 | PixelFormat::Rgb16_565 | PixelFormat::Rgb15_555 => {
				let bpp = fmt.bpp() as usize;
				let stride = fmt.line_size(0) as usize;
				for y in 0..height {
					let src_y = if vertical { height - 1 - y } else { y };
					for x in 0..width {
						let src_x = if horizontal { width - 1 - x } else { x };
						let src_off = src_y * stride + src_x * bpp;
						let dst_off = y * stride + x * bpp;
						out.data[dst_off..dst_off + bpp].copy_from_slice(&self.data[src_off..src_off + bpp]);
					}
				}
			}
			PixelFormat::Uyvy422 | PixelFormat::Yuyv422 => {
				let stride = fmt.line_size(0) as usize;
				let pairs = width / 2;
				for y in 0..height {
					let src_y = if vertical { height - 1 - y } else { y };
					for pair in 0..pairs {
						let src_pair = if horizontal { pairs - 1 - pair } else { pair };
						let src_off = src_y * stride + src_pair * 4;
						let dst_off = y * stride + pair * 4;
						let mut quad = [
							self.data[src_off],
							self.data[src_off + 1],
							self.data[src_off + 2],
							self.data[src_off + 3],
						];
						if horizontal {
							match fmt.pixel_format {
								PixelFormat::Uyvy422 => quad.swap(1, 3),
								PixelFormat::Yuyv422 => quad.swap(0, 2),
								_ => unreachable!(),
							}
						}
						out.data[dst_off..dst_off + 4].copy_from_slice(&quad);
					}
				}
			}
			PixelFormat::Nv12 => {
				let luma_stride = fmt.line_size(0) as usize;
				for y in 0..height {
					let src_y = if vertical { height - 1 - y } else { y };
					for x in 0..width {
						let src_x = if horizontal { width - 1 - x } else { x };
						out.data[y * luma_stride + x] = self.data[src_y * luma_stride + src_x];
					}
				}

				let chroma_height = (fmt.height as usize).div_ceil(2);
				let chroma_stride = fmt.line_size(1) as usize;
				let chroma_pairs = (width).div_ceil(2);
				let chroma_off = fmt.plane_offset(1) as usize;
				for cy in 0..chroma_height {
					let src_cy = if vertical { chroma_height - 1 - cy } else { cy };
					for cx in 0..chroma_pairs {
						let src_cx = if horizontal { chroma_pairs - 1 - cx } else { cx };
						let src_off = chroma_off + src_cy * chroma_stride + src_cx * 2;
						let dst_off = chroma_off + cy * chroma_stride + cx * 2;
						out.data[dst_off] = self.data[src_off];
						out.data[dst_off + 1] = self.data[src_off + 1];
					}
				}
			}
		}

		out
	}

	/// Swaps the red/blue (or, for YUV formats, the Cb/Cr) components in
	/// place. Its own inverse: `swap_rgb().swap_rgb() == self`.
	pub fn swap_rgb(&self) -> VideoFrame {
		if !self.is_valid() {
			return VideoFrame::empty();
		}

		let fmt = self.format;
		let mut out = self.clone();
		let width = fmt.width as usize;
		let height = fmt.height as usize;

		match fmt.pixel_format {
			PixelFormat::Rgb32 => {
				let stride = fmt.line_size(0) as usize;
				for y in 0..height {
					for x in 0..width {
						let off = y * stride + x * 4;
						out.data.swap(off, off + 2);
					}
				}
			}
			PixelFormat::Rgb24 => {
				let stride = fmt.line_size(0) as usize;
				for y in 0..height {
					for x in 0..width {
						let off = y * stride + x * 3;
						out.data.swap(off, off + 2);
					}
				}
			}
			PixelFormat::Rgb16_565 | PixelFormat::Rgb15_555 => {
				let stride = fmt.line_size(0) as usize;
				let (rshift, gshift, gbits) = match fmt.pixel_format {
					PixelFormat::Rgb16_565 => (11, 5, 6),
					_ => (10, 5, 5),
				};
				for y in 0..height {
					for x in 0..width {
						let off = y * stride + x * 2;
						let v = u16::from_le_bytes([self.data[off], self.data[off + 1]]);
						let r = (v >> rshift) & 0x1F;
						let g = (v >> gshift) & ((1 << gbits) - 1);
						let b = v & 0x1F;
						let swapped = (b << rshift) | (g << gshift) | r;
						out.data[off..off + 2].copy_from_slice(&swapped.to_le_bytes());
					}
				}
			}
			PixelFormat::Uyvy422 => {
				let stride = fmt.line_size(0) as usize;
				for y in 0..height {
					for pair in 0..width / 2 {
						let off = y * stride + pair * 4;
						out.data.swap(off, off + 2);
					}
				}
			}
			PixelFormat::Yuyv422 => {
				let stride = fmt.line_size(0) as usize;
				for y in 0..height {
					for pair in 0..width / 2 {
						let off = y * stride + pair * 4;
						out.data.swap(off + 1, off + 3);
					}
				}
			}
			PixelFormat::Nv12 => {
				let chroma_off = fmt.plane_offset(1) as usize;
				let chroma_stride = fmt.line_size(1) as usize;
				let chroma_height = (fmt.height as usize).div_ceil(2);
				for cy in 0..chroma_height {
					for cx in 0..width.div_ceil(2) {
						let off = chroma_off + cy * chroma_stride + cx * 2;
						out.data.swap(off, off + 1);
					}
				}
			}
		}

		out
	}

	/// Brightness/contrast/gamma/hue/saturation adjustment. For RGB
	/// formats the full HSL-ish pipeline applies; for YUV formats only the
	/// luma channel is touched (hue/saturation have no meaning there), and
	/// `gray` forces chroma to neutral (128).
	#[allow(clippy::too_many_arguments)]
	pub fn adjust(&self, hue: i32, saturation: i32, luminance: i32, gamma: i32, contrast: i32, gray: bool) -> VideoFrame {
		if !self.is_valid() {
			return VideoFrame::empty();
		}

		let hue = hue.clamp(-359, 359);
		let saturation = saturation.clamp(-255, 255);
		let luminance = luminance.clamp(-255, 255);
		let gamma = gamma.clamp(-255, 255);
		let contrast = contrast.clamp(-255, 255);

		let fmt = self.format;
		let mut out = self.clone();

		if fmt.pixel_format.is_rgb_family() {
			let bpp = fmt.bpp() as usize;
			match fmt.pixel_format {
				PixelFormat::Rgb32 | PixelFormat::Rgb24 => {
					for px in out.data.chunks_mut(bpp) {
						let (b_idx, r_idx) = if fmt.pixel_format == PixelFormat::Rgb32 { (0, 2) } else { (2, 0) };
						let (r, g, b) = adjust_rgb(px[r_idx], px[1], px[b_idx], hue, saturation, luminance, gamma, contrast, gray);
						px[r_idx] = r;
						px[1] = g;
						px[b_idx] = b;
					}
				}
				PixelFormat::Rgb16_565 | PixelFormat::Rgb15_555 => {
					let (rb, gb) = if fmt.pixel_format == PixelFormat::Rgb16_565 { (5, 6) } else { (5, 5) };
					let (rshift, gshift) = if fmt.pixel_format == PixelFormat::Rgb16_565 { (11, 5) } else { (10, 5) };
					for px in out.data.chunks_mut(2) {
						let v = u16::from_le_bytes([px[0], px[1]]);
						let r = expand(((v >> rshift) & 0x1F) as u8, 5);
						let g = expand(((v >> gshift) & ((1 << gb) - 1)) as u8, gb);
						let b = expand((v & 0x1F) as u8, 5);
						let (r, g, b) = adjust_rgb(r, g, b, hue, saturation, luminance, gamma, contrast, gray);
						let packed = (compress(r, rb) as u16) << rshift
							| (compress(g, gb) as u16) << gshift
							| compress(b, 5) as u16;
						px.copy_from_slice(&packed.to_le_bytes());
					}
				}
				_ => unreachable!(),
			}
		} else {
			let luma_len = (fmt.line_size(0) * fmt.height) as usize;
			let luma_plane_start = match fmt.pixel_format {
				PixelFormat::Nv12 => 0,
				_ => 0,
			};
			match fmt.pixel_format {
				PixelFormat::Nv12 => {
					for y in out.data[luma_plane_start..luma_plane_start + luma_len].iter_mut() {
						*y = adjust_luma(*y, luminance, gamma, contrast);
					}
					if gray {
						let chroma_off = fmt.plane_offset(1) as usize;
						for b in out.data[chroma_off..].iter_mut() {
							*b = 128;
						}
					}
				}
				PixelFormat::Uyvy422 => {
					for quad in out.data.chunks_mut(4) {
						quad[1] = adjust_luma(quad[1], luminance, gamma, contrast);
						quad[3] = adjust_luma(quad[3], luminance, gamma, contrast);
						if gray {
							quad[0] = 128;
							quad[2] = 128;
						}
					}
				}
				PixelFormat::Yuyv422 => {
					for quad in out.data.chunks_mut(4) {
						quad[0] = adjust_luma(quad[0], luminance, gamma, contrast);
						quad[2] = adjust_luma(quad[2], luminance, gamma, contrast);
						if gray {
							quad[1] = 128;
							quad[3] = 128;
						}
					}
				}
				_ => unreachable!(),
			}
		}

		out
	}

	/// Resizes to `width`x`height` via an internal RGB24 representation,
	/// then converts back to the original pixel format.
	pub fn scaled(&self, width: u32, height: u32, mode: ScalingMode, aspect: AspectRatioMode) -> VideoFrame {
		if !self.is_valid() || width == 0 || height == 0 {
			return VideoFrame::empty();
		}

		let original_format = self.format.pixel_format;
		let src = self.convert(PixelFormat::Rgb24);
		let src_w = src.format.width as f64;
		let src_h = src.format.height as f64;

		let out_format = VideoFormat::new(PixelFormat::Rgb24, width, height, self.format.fps);
		let mut out = VideoFrame::from_format(out_format);
		let stride = out_format.line_size(0) as usize;

		match aspect {
			AspectRatioMode::Ignore | AspectRatioMode::Keep => {
				let (content_w, content_h, off_x, off_y) = if aspect == AspectRatioMode::Ignore {
					(width, height, 0u32, 0u32)
				} else {
					let scale = (f64::from(width) / src_w).min(f64::from(height) / src_h);
					let cw = (src_w * scale).round().max(1.0) as u32;
					let ch = (src_h * scale).round().max(1.0) as u32;
					(cw.min(width), ch.min(height), (width - cw.min(width)) / 2, (height - ch.min(height)) / 2)
				};
				for oy in off_y..off_y + content_h {
					let sy = (f64::from(oy - off_y) + 0.5) * src_h / f64::from(content_h);
					for ox in off_x..off_x + content_w {
						let sx = (f64::from(ox - off_x) + 0.5) * src_w / f64::from(content_w);
						let (r, g, b) = sample(&src, sx, sy, mode);
						let off = oy as usize * stride + ox as usize * 3;
						out.data[off] = r;
						out.data[off + 1] = g;
						out.data[off + 2] = b;
					}
				}
			}
			AspectRatioMode::Expanding => {
				let scale = (f64::from(width) / src_w).max(f64::from(height) / src_h);
				let crop_w = f64::from(width) / scale;
				let crop_h = f64::from(height) / scale;
				let crop_x = (src_w - crop_w) / 2.0;
				let crop_y = (src_h - crop_h) / 2.0;
				for oy in 0..height {
					let sy = crop_y + (f64::from(oy) + 0.5) * crop_h / f64::from(height);
					for ox in 0..width {
						let sx = crop_x + (f64::from(ox) + 0.5) * crop_w / f64::from(width);
						let (r, g, b) = sample(&src, sx, sy, mode);
						let off = oy as usize * stride + ox as usize * 3;
						out.data[off] = r;
						out.data[off + 1] = g;
						out.data[off + 2] = b;
					}
				}
			}
		}

		out.convert(original_format)
	}
}

fn sample(frame: &VideoFrame, x: f64, y: f64, mode: ScalingMode) -> (u8, u8, u8) {
	let max_x = frame.format.width - 1;
	let max_y = frame.format.height - 1;

	match mode {
		ScalingMode::Fast => {
			let px = (x.round() as i64).clamp(0, i64::from(max_x)) as u32;
			let py = (y.round() as i64).clamp(0, i64::from(max_y)) as u32;
			pixel_at(frame, px, py)
		}
		ScalingMode::Linear => {
			let x0 = x.floor().clamp(0.0, f64::from(max_x));
			let y0 = y.floor().clamp(0.0, f64::from(max_y));
			let x1 = (x0 + 1.0).min(f64::from(max_x));
			let y1 = (y0 + 1.0).min(f64::from(max_y));
			let fx = x - x0;
			let fy = y - y0;

			let p00 = pixel_at(frame, x0 as u32, y0 as u32);
			let p10 = pixel_at(frame, x1 as u32, y0 as u32);
			let p01 = pixel_at(frame, x0 as u32, y1 as u32);
			let p11 = pixel_at(frame, x1 as u32, y1 as u32);

			let lerp = |a: u8, b: u8, t: f64| f64::from(a) * (1.0 - t) + f64::from(b) * t;
			let mix = |c: fn(&(u8, u8, u8)) -> u8| {
				let top = lerp(c(&p00), c(&p10), fx);
				let bottom = lerp(c(&p01), c(&p11), fx);
				(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
			};

			(mix(|p| p.0), mix(|p| p.1), mix(|p| p.2))
		}
	}
}

fn pixel_at(frame: &VideoFrame, x: u32, y: u32) -> (u8, u8, u8) {
	let stride = frame.format.line_size(0) as usize;
	let off = y as usize * stride + x as usize * 3;
	(frame.data[off], frame.data[off + 1], frame.data[off + 2])
}

fn expand(value: u8, bits: u32) -> u8 {
	let max = (1u32 << bits) - 1;
	((u32::from(value) * 255 + max / 2) / max) as u8
}

fn compress(value: u8, bits: u32) -> u8 {
	let max = (1u32 << bits) - 1;
	((u32::from(value) * max + 127) / 255) as u8
}

fn adjust_luma(y: u8, luminance: i32, gamma: i32, contrast: i32) -> u8 {
	let mult = 2f64.powf(f64::from(gamma) / 128.0);
	let mut v = f64::from(y) / 255.0;
	v = v.powf(1.0 / mult.max(0.001));
	v *= 255.0;

	let factor = f64::from(259 * (contrast + 255)) / f64::from(255 * (259 - contrast)).max(1.0);
	v = factor * (v - 128.0) + 128.0;
	v += f64::from(luminance);

	v.round().clamp(0.0, 255.0) as u8
}

#[allow(clippy::too_many_arguments)]
fn adjust_rgb(r: u8, g: u8, b: u8, hue: i32, saturation: i32, luminance: i32, gamma: i32, contrast: i32, gray: bool) -> (u8, u8, u8) {
	let gamma_corrected = |c: u8| -> u8 {
		let mult = 2f64.powf(f64::from(gamma) / 128.0);
		(255.0 * (f64::from(c) / 255.0).powf(1.0 / mult.max(0.001))).round().clamp(0.0, 255.0) as u8
	};
	let (r, g, b) = (gamma_corrected(r), gamma_corrected(g), gamma_corrected(b));

	let factor = f64::from(259 * (contrast + 255)) / f64::from(255 * (259 - contrast)).max(1.0);
	let contrasted = |c: u8| (factor * (f64::from(c) - 128.0) + 128.0).round().clamp(0.0, 255.0) as u8;
	let (r, g, b) = (contrasted(r), contrasted(g), contrasted(b));

	let (h, s, l) = rgb_to_hsl(r, g, b);
	let l = (l + f64::from(luminance) / 255.0).clamp(0.0, 1.0);
	let s = if gray { 0.0 } else { (s * (1.0 + f64::from(saturation) / 255.0)).clamp(0.0, 1.0) };
	let h = (h + f64::from(hue)).rem_euclid(360.0);

	hsl_to_rgb(h, s, l)
}

fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
	let r = f64::from(r) / 255.0;
	let g = f64::from(g) / 255.0;
	let b = f64::from(b) / 255.0;
	let max = r.max(g).max(b);
	let min = r.min(g).min(b);
	let l = (max + min) / 2.0;

	if (max - min).abs() < f64::EPSILON {
		return (0.0, 0.0, l);
	}

	let d = max - min;
	let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
	let h = if max == r {
		((g - b) / d).rem_euclid(6.0)
	} else if max == g {
		(b - r) / d + 2.0
	} else {
		(r - g) / d + 4.0
	} * 60.0;

	(h, s, l)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
	if s.abs() < f64::EPSILON {
		let v = (l * 255.0).round().clamp(0.0, 255.0) as u8;
		return (v, v, v);
	}

	let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
	let hp = h / 60.0;
	let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
	let (r1, g1, b1) = match hp as u32 {
		0 => (c, x, 0.0),
		1 => (x, c, 0.0),
		2 => (0.0, c, x),
		3 => (0.0, x, c),
		4 => (x, 0.0, c),
		_ => (c, 0.0, x),
	};
	let m = l - c / 2.0;
	let conv = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
	(conv(r1), conv(g1), conv(b1))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::buffer::VideoFrame;
	use crate::frame::format::Fraction;

	fn solid_frame(w: u32, h: u32, r: u8, g: u8, b: u8) -> VideoFrame {
		let fmt = VideoFormat::new(PixelFormat::Rgb24, w, h, Fraction::new(1, 1));
		let mut frame = VideoFrame::from_format(fmt);
		for px in frame.data.chunks_mut(3) {
			px[0] = r;
			px[1] = g;
			px[2] = b;
		}
		frame
	}

	#[test]
	fn mirror_is_involution() {
		let mut frame = solid_frame(4, 3, 10, 20, 30);
		for (i, b) in frame.data.iter_mut().enumerate() {
			*b = (i * 11) as u8;
		}
		let mirrored = frame.mirror(true, true).mirror(true, true);
		assert_eq!(frame, mirrored);
	}

	#[test]
	fn swap_rgb_is_involution() {
		let frame = solid_frame(4, 2, 10, 20, 30);
		assert_eq!(frame, frame.swap_rgb().swap_rgb());
	}

	#[test]
	fn scaled_preserves_format_and_dims() {
		let frame = solid_frame(8, 8, 100, 150, 200);
		let scaled = frame.scaled(4, 4, ScalingMode::Linear, AspectRatioMode::Ignore);
		assert_eq!(scaled.format.width, 4);
		assert_eq!(scaled.format.height, 4);
		assert_eq!(scaled.format.pixel_format, PixelFormat::Rgb24);
	}

	#[test]
	fn keep_aspect_letterboxes_with_black() {
		let frame = solid_frame(4, 4, 255, 255, 255);
		let scaled = frame.scaled(8, 4, ScalingMode::Fast, AspectRatioMode::Keep);
		// a 4x4 source into an 8x4 target keeping aspect leaves pillarbox bars.
		assert_eq!(&scaled.data[0..3], &[0, 0, 0]);
	}
}
