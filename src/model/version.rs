//! Version vectors: per-device monotone counters with conflict tests.

use serde::{Deserialize, Serialize};

use crate::proto;

fn now_seconds() -> u64 {
	let t = chrono::Utc::now().timestamp();
	if t > 0 {
		t as u64
	} else {
		0
	}
}

/// A version vector with a cached index of the best (maximum) counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
	counters: Vec<proto::Counter>,
	best: usize,
}

impl Version {
	/// Builds a vector from its wire form; empty input yields an empty vector
	pub fn from_proto(v: &proto::Vector) -> Self {
		let mut best = 0;
		for (i, c) in v.counters.iter().enumerate() {
			if c.value > v.counters[best].value {
				best = i;
			}
		}
		Version { counters: v.counters.clone(), best }
	}

	/// A fresh vector holding a single counter for `device_uint`
	pub fn new(device_uint: u64) -> Self {
		let mut v = Version { counters: Vec::with_capacity(1), best: 0 };
		v.update(device_uint);
		v
	}

	pub fn as_proto(&self) -> proto::Vector {
		proto::Vector { counters: self.counters.clone() }
	}

	pub fn counters(&self) -> &[proto::Counter] {
		&self.counters
	}

	pub fn is_empty(&self) -> bool {
		self.counters.is_empty()
	}

	/// The maximum-value counter
	pub fn best(&self) -> proto::Counter {
		if self.counters.is_empty() {
			proto::Counter::default()
		} else {
			self.counters[self.best]
		}
	}

	/// Bumps the counter of `device_uint` past every other counter
	///
	/// The new value is `max(best + 1, wall-clock seconds)`, so it is
	/// strictly monotone across updates and roughly tracks real time.
	pub fn update(&mut self, device_uint: u64) {
		let mut value = now_seconds();
		if !self.counters.is_empty() {
			value = value.max(self.counters[self.best].value + 1);
		}
		match self.counters.iter().position(|c| c.id == device_uint) {
			Some(i) => {
				self.counters[i].value = value;
				self.best = i;
			}
			None => {
				self.counters.push(proto::Counter { id: device_uint, value });
				self.best = self.counters.len() - 1;
			}
		}
	}

	/// `self ⊇ other`: self has a counter for other's best id with a value
	/// at least as large
	pub fn contains(&self, other: &Version) -> bool {
		let other_best = other.best();
		self.counters
			.iter()
			.any(|c| c.id == other_best.id && c.value >= other_best.value)
	}

	/// Counter-sequence equality
	pub fn identical_to(&self, other: &Version) -> bool {
		self.counters == other.counters
	}

	/// Neither vector contains the other
	pub fn concurrent(&self, other: &Version) -> bool {
		!self.contains(other) && !other.contains(self)
	}
}

/// Bumps `device_uint`'s counter directly on a wire vector
///
/// Used when a diff constructs the updated metadata before the model file
/// exists: the new value exceeds every counter already present.
pub fn record_update(v: &mut proto::Vector, device_uint: u64) {
	let mut value = 0u64;
	let mut target = None;
	for (i, c) in v.counters.iter().enumerate() {
		value = value.max(c.value + 1);
		if c.id == device_uint {
			target = Some(i);
		}
	}
	match target {
		Some(i) => v.counters[i].value = value,
		None => v.counters.push(proto::Counter { id: device_uint, value }),
	}
}


// vim: ts=4
