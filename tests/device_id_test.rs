//! Device identifier round trips through every representation.

use bepcore::model::{DeviceId, LOCAL_DEVICE_ID};

#[test]
fn test_canonical_form_of_counting_digest() {
	let sha: [u8; 32] = core::array::from_fn(|i| i as u8);
	let id = DeviceId::from_sha256(&sha);

	let value = id.value();
	assert_eq!(value.len(), 63);
	assert!(value.starts_with("AAAQEAY-EAUDAO"));
	assert!(value.chars().all(|c| c == '-' || c.is_ascii_uppercase() || c.is_ascii_digit()));
	// four luhnized groups of 13+1, dashed every 7 characters
	for (i, c) in value.chars().enumerate() {
		assert_eq!(c == '-', i % 8 == 7, "dash misplaced at {}", i);
	}

	let parsed = DeviceId::from_string(value).unwrap();
	assert_eq!(parsed.sha256(), &sha);
	assert_eq!(parsed, id);
}

#[test]
fn test_round_trip_over_many_digests() {
	for seed in 0u8..32 {
		let sha: [u8; 32] = core::array::from_fn(|i| (i as u8).wrapping_mul(31).wrapping_add(seed));
		let id = DeviceId::from_sha256(&sha);
		let parsed = DeviceId::from_string(id.value()).unwrap();
		assert_eq!(parsed.sha256(), &sha);
	}
}

#[test]
fn test_from_cert_is_digest_of_certificate() {
	use sha2::{Digest, Sha256};
	let cert = b"not really a certificate, but stable bytes";
	let id = DeviceId::from_cert(cert);
	let digest: [u8; 32] = Sha256::digest(cert).into();
	assert_eq!(id.sha256(), &digest);
	assert_eq!(DeviceId::from_sha256(&digest), id);
}

#[test]
fn test_local_device_id_is_distinguished() {
	let mut sha = [0u8; 32];
	sha[0] = 0xFF;
	assert_eq!(&*LOCAL_DEVICE_ID, &DeviceId::from_sha256(&sha));
	assert_eq!(LOCAL_DEVICE_ID.key()[0], 0x10);
	assert_eq!(LOCAL_DEVICE_ID.value().len(), 63);
}

#[test]
fn test_corrupted_strings_are_rejected() {
	let sha = [0x5A; 32];
	let id = DeviceId::from_sha256(&sha);

	// truncated
	assert!(DeviceId::from_string(&id.value()[..62]).is_err());
	// lowercase is not canonical
	assert!(DeviceId::from_string(&id.value().to_lowercase()).is_err());
	// single-character damage breaks the group checksum
	let mut damaged: Vec<char> = id.value().chars().collect();
	damaged[1] = if damaged[1] == 'A' { 'B' } else { 'A' };
	let damaged: String = damaged.into_iter().collect();
	assert!(DeviceId::from_string(&damaged).is_err());
}

#[test]
fn test_short_form_is_prefix_and_matches_uint() {
	let sha = [0x11; 32];
	let id = DeviceId::from_sha256(&sha);
	assert_eq!(id.short().len(), 7);
	assert!(id.value().starts_with(id.short()));
	assert_eq!(DeviceId::make_short(id.uint()), id.short());
}

// vim: ts=4
