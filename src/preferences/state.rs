use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::frame::format::{Fraction, PixelFormat, VideoFormat};
use crate::preferences::ini::Ini;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
	pub id: String,
	pub description: String,
	pub formats: Vec<VideoFormat>,
	pub controls: BTreeMap<String, i32>,
	pub direct_mode: bool,
}

/// In-memory preferences state: the picture overlay path, log level, and
/// the ordered device list. Order is the persisted, user-visible order —
/// not alphabetical by `device_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferencesState {
	pub picture: String,
	pub log_level: i32,
	pub devices: Vec<DeviceRecord>,
}

const DEVICE_ID_PREFIX: &str = "Cam";

impl PreferencesState {
	pub fn from_ini(ini: &Ini) -> Result<PreferencesState> {
		let picture = ini.value("General", "Picture").unwrap_or_default().to_string();
		let log_level = ini
			.value("General", "LogLevel")
			.and_then(|v| v.parse().ok())
			.unwrap_or(0);

		let count: usize = ini
			.value("General", "Cameras/size")
			.and_then(|v| v.parse().ok())
			.unwrap_or(0);

		let mut devices = Vec::with_capacity(count);
		for i in 1..=count {
			let prefix = format!("Cameras/{i}");
			let id = ini
				.value("General", &format!("{prefix}/id"))
				.ok_or_else(|| Error::Corrupted(format!("missing id for device index {i}")))?
				.to_string();
			let description = ini.value("General", &format!("{prefix}/description")).unwrap_or_default().to_string();
			let direct_mode = ini
				.value("General", &format!("{prefix}/direct_mode"))
				.map(|v| v == "true" || v == "1")
				.unwrap_or(false);

			let format_count: usize = ini
				.value("General", &format!("{prefix}/Formats/size"))
				.and_then(|v| v.parse().ok())
				.unwrap_or(0);
			let mut formats = Vec::with_capacity(format_count);
			for f in 1..=format_count {
				let fprefix = format!("{prefix}/Formats/{f}");
				let tag: u32 = ini
					.value("General", &format!("{fprefix}/pixel_format"))
					.and_then(|v| v.parse().ok())
					.ok_or_else(|| Error::Corrupted(format!("missing pixel_format at {fprefix}")))?;
				let width = ini.value("General", &format!("{fprefix}/width")).and_then(|v| v.parse().ok()).unwrap_or(0);
				let height = ini.value("General", &format!("{fprefix}/height")).and_then(|v| v.parse().ok()).unwrap_or(0);
				let fps_num = ini.value("General", &format!("{fprefix}/fps_num")).and_then(|v| v.parse().ok()).unwrap_or(1);
				let fps_den = ini.value("General", &format!("{fprefix}/fps_den")).and_then(|v| v.parse().ok()).unwrap_or(1);
				formats.push(VideoFormat::new(PixelFormat::try_from(tag)?, width, height, Fraction::new(fps_num, fps_den)));
			}

			let mut controls = BTreeMap::new();
			for key_path in ini.keys_under("General", &format!("{prefix}/Controls")) {
				let key = key_path.rsplit('/').next().unwrap_or(&key_path).to_string();
				if let Some(v) = ini.value("General", &format!("{prefix}/Controls/{key}")) {
					if let Ok(value) = v.parse() {
						controls.insert(key, value);
					}
				}
			}

			devices.push(DeviceRecord { id, description, formats, controls, direct_mode });
		}

		Ok(PreferencesState { picture, log_level, devices })
	}

	pub fn to_ini(&self) -> Ini {
		let mut ini = Ini::default();
		ini.set("General", "Picture", self.picture.clone());
		ini.set("General", "LogLevel", self.log_level.to_string());
		ini.set("General", "Cameras/size", self.devices.len().to_string());

		for (i, device) in self.devices.iter().enumerate() {
			let idx = i + 1;
			let prefix = format!("Cameras/{idx}");
			ini.set("General", &format!("{prefix}/id"), device.id.clone());
			ini.set("General", &format!("{prefix}/description"), device.description.clone());
			ini.set("General", &format!("{prefix}/direct_mode"), device.direct_mode.to_string());
			ini.set("General", &format!("{prefix}/Formats/size"), device.formats.len().to_string());
			for (fi, format) in device.formats.iter().enumerate() {
				let fidx = fi + 1;
				let fprefix = format!("{prefix}/Formats/{fidx}");
				ini.set("General", &format!("{fprefix}/pixel_format"), format.pixel_format.tag().to_string());
				ini.set("General", &format!("{fprefix}/width"), format.width.to_string());
				ini.set("General", &format!("{fprefix}/height"), format.height.to_string());
				ini.set("General", &format!("{fprefix}/fps_num"), format.fps.num.to_string());
				ini.set("General", &format!("{fprefix}/fps_den"), format.fps.den.to_string());
			}
			for (key, value) in &device.controls {
				ini.set("General", &format!("{prefix}/Controls/{key}"), value.to_string());
			}
		}

		ini
	}

	fn device_mut(&mut self, id: &str) -> Result<&mut DeviceRecord> {
		self.devices
			.iter_mut()
			.find(|d| d.id == id)
			.ok_or_else(|| Error::NotFound { what: "device", id: id.to_string() })
	}

	fn device(&self, id: &str) -> Result<&DeviceRecord> {
		self.devices.iter().find(|d| d.id == id).ok_or_else(|| Error::NotFound { what: "device", id: id.to_string() })
	}

	fn next_device_id(&self) -> String {
		let used: std::collections::HashSet<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
		let mut i = 0u32;
		loop {
			let candidate = format!("{DEVICE_ID_PREFIX}{i}");
			if !used.contains(candidate.as_str()) {
				return candidate;
			}
			i += 1;
		}
	}

	pub fn add_device(&mut self, description: String, preferred_id: Option<String>) -> String {
		let id = match preferred_id {
			Some(id) if !self.devices.iter().any(|d| d.id == id) => id,
			_ => self.next_device_id(),
		};
		self.devices.push(DeviceRecord {
			id: id.clone(),
			description,
			formats: Vec::new(),
			controls: BTreeMap::new(),
			direct_mode: false,
		});
		id
	}

	pub fn remove_device(&mut self, id: &str) -> Result<()> {
		let before = self.devices.len();
		self.devices.retain(|d| d.id != id);
		if self.devices.len() == before {
			return Err(Error::NotFound { what: "device", id: id.to_string() });
		}
		Ok(())
	}

	pub fn list_devices(&self) -> Vec<String> {
		self.devices.iter().map(|d| d.id.clone()).collect()
	}

	pub fn description(&self, id: &str) -> Result<String> {
		Ok(self.device(id)?.description.clone())
	}

	pub fn set_description(&mut self, id: &str, description: String) -> Result<()> {
		self.device_mut(id)?.description = description;
		Ok(())
	}

	pub fn formats(&self, id: &str) -> Result<Vec<VideoFormat>> {
		Ok(self.device(id)?.formats.clone())
	}

	pub fn set_formats(&mut self, id: &str, formats: Vec<VideoFormat>) -> Result<()> {
		self.device_mut(id)?.formats = formats;
		Ok(())
	}

	pub fn add_format(&mut self, id: &str, format: VideoFormat, index: i64) -> Result<()> {
		let device = self.device_mut(id)?;
		if index < 0 || index as usize >= device.formats.len() {
			device.formats.push(format);
		} else {
			device.formats.insert(index as usize, format);
		}
		Ok(())
	}

	pub fn remove_format(&mut self, id: &str, index: usize) -> Result<()> {
		let device = self.device_mut(id)?;
		if index >= device.formats.len() {
			return Err(Error::InvalidArgument(format!("format index {index} out of range")));
		}
		device.formats.remove(index);
		Ok(())
	}

	pub fn control_value(&self, id: &str, key: &str) -> Result<i32> {
		Ok(self.device(id)?.controls.get(key).copied().unwrap_or(0))
	}

	pub fn set_control_value(&mut self, id: &str, key: &str, value: i32) -> Result<()> {
		self.device_mut(id)?.controls.insert(key.to_string(), value);
		Ok(())
	}

	pub fn all_controls(&self, id: &str) -> Result<BTreeMap<String, i32>> {
		Ok(self.device(id)?.controls.clone())
	}

	pub fn direct_mode(&self, id: &str) -> Result<bool> {
		Ok(self.device(id)?.direct_mode)
	}

	pub fn set_direct_mode(&mut self, id: &str, value: bool) -> Result<()> {
		self.device_mut(id)?.direct_mode = value;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip_preserves_state() {
		let mut state = PreferencesState::default();
		let id = state.add_device("Cam A".to_string(), None);
		state
			.set_formats(&id, vec![VideoFormat::new(PixelFormat::Rgb24, 640, 480, Fraction::new(30, 1))])
			.unwrap();
		state.set_control_value(&id, "hflip", 1).unwrap();
		state.set_direct_mode(&id, true).unwrap();
		state.picture = "/tmp/overlay.bmp".to_string();
		state.log_level = 2;

		let ini = state.to_ini();
		let reloaded = PreferencesState::from_ini(&ini).unwrap();
		assert_eq!(state, reloaded);
	}

	#[test]
	fn device_id_reuses_lowest_free_index() {
		let mut state = PreferencesState::default();
		let a = state.add_device("A".to_string(), None);
		let b = state.add_device("B".to_string(), None);
		state.remove_device(&a).unwrap();
		let c = state.add_device("C".to_string(), None);
		assert_eq!(c, a);
		assert_ne!(b, c);
	}

	#[test]
	fn preferred_id_used_when_free() {
		let mut state = PreferencesState::default();
		let id = state.add_device("A".to_string(), Some("MyCam".to_string()));
		assert_eq!(id, "MyCam");
	}
}
