//! INI-like preferences file format: parsing, escaping, and serialization.
//!
//! Escape sequences and group/array key handling are reproduced from the
//! original settings parser: `'\"?\\abfnrtv0` plus `\xHH`. Octal and
//! universal-character escapes are deliberately not supported.
use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ini {
	pub groups: BTreeMap<String, BTreeMap<String, String>>,
}

enum Line {
	Empty,
	Group(String),
	KeyValue(String, String),
}

impl Ini {
	pub fn parse(text: &str) -> Result<Ini> {
		let mut ini = Ini::default();
		let mut current_group = String::new();

		for raw_line in text.lines() {
			match parse_line(raw_line)? {
				Line::Empty => {}
				Line::Group(group) => {
					current_group = group;
					ini.groups.entry(current_group.clone()).or_default();
				}
				Line::KeyValue(key, value) => {
					if current_group.is_empty() {
						current_group = "General".to_string();
					}
					ini.groups.entry(current_group.clone()).or_default().insert(key, value);
				}
			}
		}

		Ok(ini)
	}

	pub fn serialize(&self) -> String {
		let mut out = String::new();
		for (group, entries) in &self.groups {
			out.push('[');
			out.push_str(group);
			out.push_str("]\n");
			for (key, value) in entries {
				out.push_str(key);
				out.push_str(" = ");
				out.push_str(&escape(value));
				out.push('\n');
			}
			out.push('\n');
		}
		out
	}

	pub fn value(&self, group: &str, key: &str) -> Option<&str> {
		self.groups.get(group).and_then(|g| g.get(key)).map(String::as_str)
	}

	pub fn set(&mut self, group: &str, key: &str, value: impl Into<String>) {
		self.groups.entry(group.to_string()).or_default().insert(key.to_string(), value.into());
	}

	pub fn remove_key(&mut self, group: &str, key: &str) {
		if let Some(g) = self.groups.get_mut(group) {
			g.remove(key);
		}
	}

	/// Keys directly under `group/prefix/` (one extra path segment), sorted.
	pub fn keys_under(&self, group: &str, prefix: &str) -> Vec<String> {
		let Some(entries) = self.groups.get(group) else { return Vec::new() };
		let lead = format!("{prefix}/");
		let mut out: Vec<String> = entries.keys().filter(|k| k.starts_with(&lead)).cloned().collect();
		out.sort();
		out
	}
}

fn parse_line(line: &str) -> Result<Line> {
	let trimmed = line.trim();
	if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
		return Ok(Line::Empty);
	}

	if let Some(stripped) = trimmed.strip_prefix('[') {
		let Some(group) = stripped.strip_suffix(']') else {
			return Err(Error::InvalidArgument(format!("malformed group header: {line}")));
		};
		if group.trim().is_empty() {
			return Err(Error::InvalidArgument(format!("malformed group header: {line}")));
		}
		return Ok(Line::Group(group.trim().to_string()));
	}

	let Some((key, value)) = trimmed.split_once('=') else {
		return Err(Error::InvalidArgument(format!("missing '=' in line: {line}")));
	};
	let key = key.trim().replace('\\', "/");
	if key.is_empty() {
		return Err(Error::InvalidArgument(format!("empty key in line: {line}")));
	}
	let value = unescape(value.trim());

	Ok(Line::KeyValue(key, value))
}

/// Escape table: `'\"?\\abfnrtv0` -> their control-character values.
fn unescape(raw: &str) -> String {
	let bytes = raw.as_bytes();
	if bytes.len() < 2 {
		return raw.to_string();
	}

	let (start, end) = if bytes[0] == bytes[bytes.len() - 1] && (bytes[0] == b'"' || bytes[0] == b'\'') {
		(1, bytes.len() - 1)
	} else {
		(0, bytes.len())
	};

	const ESCAPE_K: &[u8] = b"'\"?\\abfnrtv0";
	const ESCAPE_V: &[u8] = b"'\"?\\\x07\x08\x0c\n\r\t\x0b\0";

	let mut out = Vec::with_capacity(end - start);
	let mut i = start;
	while i < end {
		if bytes[i] == b'\\' && i + 1 < end {
			if let Some(pos) = ESCAPE_K.iter().position(|&c| c == bytes[i + 1]) {
				out.push(ESCAPE_V[pos]);
				i += 2;
				continue;
			}
			if bytes[i + 1] == b'x' && i + 4 <= end {
				if let Ok(hex) = std::str::from_utf8(&bytes[i + 2..i + 4]) {
					if let Ok(value) = u8::from_str_radix(hex, 16) {
						out.push(value);
						i += 4;
						continue;
					}
				}
			}
			out.push(bytes[i]);
			i += 1;
			continue;
		}
		out.push(bytes[i]);
		i += 1;
	}

	String::from_utf8_lossy(&out).into_owned()
}

fn escape(value: &str) -> String {
	let mut out = String::with_capacity(value.len() + 2);
	out.push('"');
	for b in value.bytes() {
		match b {
			b'"' => out.push_str("\\\""),
			b'\\' => out.push_str("\\\\"),
			0x07 => out.push_str("\\a"),
			0x08 => out.push_str("\\b"),
			0x0c => out.push_str("\\f"),
			b'\n' => out.push_str("\\n"),
			b'\r' => out.push_str("\\r"),
			b'\t' => out.push_str("\\t"),
			0x0b => out.push_str("\\v"),
			0x00 => out.push_str("\\0"),
			0x20..=0x7e => out.push(b as char),
			other => out.push_str(&format!("\\x{other:02x}")),
		}
	}
	out.push('"');
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_escaped_values() {
		let original = "line one\nline\ttwo\\three\"four";
		let escaped = escape(original);
		let unescaped = unescape(&escaped);
		assert_eq!(original, unescaped);
	}

	#[test]
	fn parses_groups_and_comments() {
		let text = "; comment\n[Cameras]\n# another comment\ndescription = \"Cam A\"\n";
		let ini = Ini::parse(text).unwrap();
		assert_eq!(ini.value("Cameras", "description"), Some("Cam A"));
	}

	#[test]
	fn hex_escape_decodes() {
		assert_eq!(unescape("\"\\x41\\x42\""), "AB");
	}

	#[test]
	fn backslash_key_normalizes_to_slash() {
		let text = "[Cameras]\n1\\Formats\\1\\width = 640\n";
		let ini = Ini::parse(text).unwrap();
		assert_eq!(ini.value("Cameras", "1/Formats/1/width"), Some("640"));
	}

	#[test]
	fn unquoted_escape_at_end_of_value_decodes() {
		assert_eq!(unescape("a\\n"), "a\n");
	}
}
