//! Certificate-derived device identifiers.
//!
//! A device id is the SHA-256 of the device certificate, rendered as 52
//! base32 characters split into four groups of 13, each group protected by
//! a Luhn mod-32 check digit, the result dashed every 7 characters:
//! 63 ASCII characters total, uppercase, no padding.

use std::fmt;
use std::sync::LazyLock;

use sha2::{Digest, Sha256};

use crate::db::prefix;
use crate::error::ModelError;
use crate::model::DeviceSha;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const SHA256_B32_SIZE: usize = 52;
const GROUP_SIZE: usize = 13;
const GROUPS: usize = SHA256_B32_SIZE / GROUP_SIZE;
const LUHNIZED_SIZE: usize = SHA256_B32_SIZE + GROUPS;
const DASH_INTERVAL: usize = 7;
const DASHED_SIZE: usize = LUHNIZED_SIZE + LUHNIZED_SIZE / DASH_INTERVAL - 1;

/// Length of the short human-readable prefix
pub const SHORT_LENGTH: usize = 7;

fn codepoint(c: u8) -> Option<u32> {
	match c {
		b'A'..=b'Z' => Some((c - b'A') as u32),
		b'2'..=b'7' => Some((c - b'2') as u32 + 26),
		_ => None,
	}
}

/// Luhn mod-32 check digit over one group
fn luhn32(group: &[u8]) -> Option<u8> {
	let mut factor = 1u32;
	let mut sum = 0u32;
	for &c in group {
		let cp = codepoint(c)?;
		let addend = factor * cp;
		factor = if factor == 2 { 1 } else { 2 };
		sum += addend / 32 + addend % 32;
	}
	let check = (32 - sum % 32) % 32;
	Some(ALPHABET[check as usize])
}

fn luhn32_validate(piece: &[u8]) -> bool {
	debug_assert_eq!(piece.len(), GROUP_SIZE + 1);
	luhn32(&piece[..GROUP_SIZE]) == Some(piece[GROUP_SIZE])
}

/// Base32 without padding, uppercase
fn base32_encode(data: &[u8]) -> String {
	let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
	let mut acc = 0u32;
	let mut bits = 0u32;
	for &b in data {
		acc = (acc << 8) | b as u32;
		bits += 8;
		while bits >= 5 {
			bits -= 5;
			out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
		}
	}
	if bits > 0 {
		out.push(ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
	}
	out
}

/// Decodes exactly `out_len` bytes; trailing padding bits must be zero
fn base32_decode(input: &[u8], out_len: usize) -> Option<Vec<u8>> {
	let mut out = Vec::with_capacity(out_len);
	let mut acc = 0u32;
	let mut bits = 0u32;
	for &c in input {
		acc = (acc << 5) | codepoint(c)?;
		bits += 5;
		if bits >= 8 {
			bits -= 8;
			out.push((acc >> bits) as u8);
			acc &= (1 << bits) - 1;
		}
	}
	if out.len() != out_len || acc != 0 {
		return None;
	}
	Some(out)
}

/// A certificate-derived long device identifier
///
/// Holds both the canonical 63-character string and the 33-byte persistent
/// key (one prefix byte plus the raw SHA-256).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
	value: String,
	key: [u8; 33],
}

impl DeviceId {
	/// Builds the id from a raw certificate digest
	pub fn from_sha256(sha: &DeviceSha) -> Self {
		let b32 = base32_encode(sha);
		debug_assert_eq!(b32.len(), SHA256_B32_SIZE);
		let b32 = b32.as_bytes();

		let mut luhnized = Vec::with_capacity(LUHNIZED_SIZE);
		for group in b32.chunks(GROUP_SIZE) {
			luhnized.extend_from_slice(group);
			// alphabet-only input, the check digit always exists
			luhnized.push(luhn32(group).unwrap_or(b'A'));
		}

		let mut dashed = String::with_capacity(DASHED_SIZE);
		for (i, chunk) in luhnized.chunks(DASH_INTERVAL).enumerate() {
			if i > 0 {
				dashed.push('-');
			}
			for &c in chunk {
				dashed.push(c as char);
			}
		}

		let mut key = [0u8; 33];
		key[0] = prefix::DEVICE;
		key[1..].copy_from_slice(sha);
		DeviceId { value: dashed, key }
	}

	/// Hashes a DER certificate and derives the id from the digest
	pub fn from_cert(cert: &[u8]) -> Self {
		let digest: DeviceSha = Sha256::digest(cert).into();
		Self::from_sha256(&digest)
	}

	/// Parses the canonical dashed form back into an id
	pub fn from_string(value: &str) -> Result<Self, ModelError> {
		let raw = value.as_bytes();
		if raw.len() != DASHED_SIZE {
			return Err(ModelError::MalformedDeviceId);
		}

		let undashed: Vec<u8> = raw.iter().copied().filter(|&c| c != b'-').collect();
		if undashed.len() != LUHNIZED_SIZE {
			return Err(ModelError::MalformedDeviceId);
		}
		for piece in undashed.chunks(GROUP_SIZE + 1) {
			if !luhn32_validate(piece) {
				return Err(ModelError::MalformedDeviceId);
			}
		}

		let mut b32 = Vec::with_capacity(SHA256_B32_SIZE);
		for piece in undashed.chunks(GROUP_SIZE + 1) {
			b32.extend_from_slice(&piece[..GROUP_SIZE]);
		}

		let sha = base32_decode(&b32, 32).ok_or(ModelError::MalformedDeviceId)?;
		let mut digest = [0u8; 32];
		digest.copy_from_slice(&sha);
		let id = Self::from_sha256(&digest);
		if id.value != value {
			return Err(ModelError::MalformedDeviceId);
		}
		Ok(id)
	}

	/// Renders the short form of a numeric projection
	pub fn make_short(value: u64) -> String {
		let b32 = base32_encode(&value.to_be_bytes());
		b32[..SHORT_LENGTH].to_string()
	}

	/// The canonical 63-character string
	pub fn value(&self) -> &str {
		&self.value
	}

	/// Short human-readable prefix (first 7 characters)
	pub fn short(&self) -> &str {
		&self.value[..SHORT_LENGTH]
	}

	/// The raw 32-byte certificate digest
	pub fn sha256(&self) -> &DeviceSha {
		static ZERO: DeviceSha = [0u8; 32];
		<&DeviceSha>::try_from(&self.key[1..]).unwrap_or(&ZERO)
	}

	/// The 33-byte persistent key (prefix byte plus digest)
	pub fn key(&self) -> &[u8; 33] {
		&self.key
	}

	/// Numeric projection: the first 8 digest bytes, big-endian
	///
	/// Used as the device id inside version-vector counters.
	pub fn uint(&self) -> u64 {
		let mut b = [0u8; 8];
		b.copy_from_slice(&self.key[1..9]);
		u64::from_be_bytes(b)
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.value)
	}
}

impl fmt::Debug for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "DeviceId({})", self.short())
	}
}

/// Distinguished id of the not-yet-paired local side, derived from the
/// digest `0xFF 0x00 ... 0x00`
pub static LOCAL_DEVICE_ID: LazyLock<DeviceId> = LazyLock::new(|| {
	let mut sha = [0u8; 32];
	sha[0] = 0xFF;
	DeviceId::from_sha256(&sha)
});


// vim: ts=4
