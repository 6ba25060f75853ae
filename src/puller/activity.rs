//! Outstanding request counts per device, for choosing the least busy one

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::DeviceId;

#[derive(Debug, Default)]
pub struct DeviceActivity {
	in_flight: Mutex<HashMap<DeviceId, usize>>,
}

impl DeviceActivity {
	pub fn new() -> Self {
		DeviceActivity::default()
	}

	/// Candidate with the fewest requests in flight; ties go to the earlier one.
	pub fn least_busy(&self, candidates: &[DeviceId]) -> Option<DeviceId> {
		let map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
		let mut best: Option<(DeviceId, usize)> = None;
		for d in candidates {
			let n = map.get(d).copied().unwrap_or(0);
			if best.map_or(true, |(_, b)| n < b) {
				best = Some((*d, n));
			}
		}
		best.map(|(d, _)| d)
	}

	pub fn in_flight(&self, device: &DeviceId) -> usize {
		let map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
		map.get(device).copied().unwrap_or(0)
	}

	/// Count a request against `device` until the guard is dropped.
	pub fn using(self: &Arc<Self>, device: DeviceId) -> ActivityGuard {
		{
			let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
			*map.entry(device).or_insert(0) += 1;
		}
		ActivityGuard { activity: Arc::clone(self), device }
	}

	fn done(&self, device: &DeviceId) {
		let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(n) = map.get_mut(device) {
			*n = n.saturating_sub(1);
			if *n == 0 {
				map.remove(device);
			}
		}
	}
}

/// Releases one in-flight request on drop.
#[derive(Debug)]
pub struct ActivityGuard {
	activity: Arc<DeviceActivity>,
	device: DeviceId,
}

impl Drop for ActivityGuard {
	fn drop(&mut self) {
		self.activity.done(&self.device);
	}
}


// vim: ts=4
