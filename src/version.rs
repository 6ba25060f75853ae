//! Version vectors
//!
//! A [`Vector`] is a set of per-device counters kept sorted by short device
//! id. Comparing two vectors tells whether one descends from the other or
//! whether they were modified concurrently.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ShortId;

/// One device's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
	pub id: ShortId,
	pub value: u64,
}

/// Result of comparing two vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
	Equal,
	Greater,
	Lesser,
	ConcurrentLesser,
	ConcurrentGreater,
}

impl Ordering {
	pub fn is_concurrent(self) -> bool {
		matches!(self, Ordering::ConcurrentLesser | Ordering::ConcurrentGreater)
	}
}

/// Version vector. Counters are sorted by id and never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vector {
	pub counters: Vec<Counter>,
}

impl Vector {
	pub fn new() -> Self {
		Vector { counters: Vec::new() }
	}

	pub fn is_empty(&self) -> bool {
		self.counters.is_empty()
	}

	/// Returns a copy with the counter for `id` incremented by one.
	pub fn update(&self, id: ShortId) -> Vector {
		let mut counters = self.counters.clone();
		match counters.binary_search_by(|c| c.id.cmp(&id)) {
			Ok(i) => counters[i].value += 1,
			Err(i) => counters.insert(i, Counter { id, value: 1 }),
		}
		Vector { counters }
	}

	/// Element-wise maximum of both vectors.
	pub fn merge(&self, other: &Vector) -> Vector {
		let mut counters = self.counters.clone();
		for oc in &other.counters {
			match counters.binary_search_by(|c| c.id.cmp(&oc.id)) {
				Ok(i) => {
					if oc.value > counters[i].value {
						counters[i].value = oc.value;
					}
				}
				Err(i) => counters.insert(i, *oc),
			}
		}
		Vector { counters }
	}

	/// Counter value for `id`, zero if absent.
	pub fn counter(&self, id: ShortId) -> u64 {
		self.counters
			.binary_search_by(|c| c.id.cmp(&id))
			.map(|i| self.counters[i].value)
			.unwrap_or(0)
	}

	pub fn compare(&self, other: &Vector) -> Ordering {
		let (a, b) = (&self.counters, &other.counters);
		let (mut ai, mut bi) = (0, 0);
		let mut result = Ordering::Equal;

		while ai < a.len() || bi < b.len() {
			let (av, bv) = if ai >= a.len() {
				bi += 1;
				(0, b[bi - 1].value)
			} else if bi >= b.len() {
				ai += 1;
				(a[ai - 1].value, 0)
			} else if a[ai].id == b[bi].id {
				ai += 1;
				bi += 1;
				(a[ai - 1].value, b[bi - 1].value)
			} else if a[ai].id < b[bi].id {
				ai += 1;
				(a[ai - 1].value, 0)
			} else {
				bi += 1;
				(0, b[bi - 1].value)
			};

			if av > bv {
				if result == Ordering::Lesser {
					return Ordering::ConcurrentLesser;
				}
				result = Ordering::Greater;
			} else if av < bv {
				if result == Ordering::Greater {
					return Ordering::ConcurrentGreater;
				}
				result = Ordering::Lesser;
			}
		}

		result
	}

	pub fn equal(&self, other: &Vector) -> bool {
		self.compare(other) == Ordering::Equal
	}

	pub fn greater_equal(&self, other: &Vector) -> bool {
		matches!(self.compare(other), Ordering::Greater | Ordering::Equal)
	}

	pub fn concurrent(&self, other: &Vector) -> bool {
		self.compare(other).is_concurrent()
	}
}

impl fmt::Display for Vector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{{")?;
		for (i, c) in self.counters.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{}:{}", c.id, c.value)?;
		}
		write!(f, "}}")
	}
}


// vim: ts=4
