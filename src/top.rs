//! Top-K selection by a sort-compatible hex key (largest sizes, latest
//! modification times)

use chrono::{DateTime, Utc};

use crate::paths::display;
use crate::writer::with_commas;

/// Hard ceiling on the table depth.
pub const MAX_DEPTH: usize = 999;

/// Fixed-capacity list ordered descending by key. Keys are hex strings whose
/// lexicographic order matches numeric order (8-char modtimes, zero-padded
/// sizes), so insertion is plain string comparison.
pub struct TopList {
	keys: Vec<String>,
	idents: Vec<String>,
	names: Vec<Vec<u8>>,
	dupes: Vec<u32>,
}

impl TopList {
	pub fn new(depth: usize, default_key: &str) -> TopList {
		let depth = depth.clamp(1, MAX_DEPTH);
		TopList {
			keys: vec![default_key.to_string(); depth],
			idents: vec![String::new(); depth],
			names: vec![b"(no entry)".to_vec(); depth],
			dupes: vec![0; depth],
		}
	}

	pub fn depth(&self) -> usize {
		self.keys.len()
	}

	/// Insert by descending key and return the K-th key as the new accept
	/// threshold, so the caller can short-circuit cheap rejections.
	/// An entry whose identifier is already present only bumps that row's
	/// duplicate count.
	pub fn add(&mut self, key: &str, id: &str, name: &[u8]) -> String {
		let depth = self.depth();
		for x in 0..depth {
			if !id.is_empty() && self.idents[x] == id {
				self.dupes[x] += 1;
				return self.keys[depth - 1].clone();
			}
		}

		// walk upward from the row above the end of the table, shifting
		// smaller rows down
		let mut pos = depth as isize - 2;
		while pos >= 0 {
			let p = pos as usize;
			if key <= self.keys[p].as_str() {
				break;
			}
			self.keys[p + 1] = self.keys[p].clone();
			self.idents[p + 1] = self.idents[p].clone();
			self.names[p + 1] = self.names[p].clone();
			self.dupes[p + 1] = self.dupes[p];
			pos -= 1;
		}
		let p = (pos + 1) as usize;
		self.keys[p] = key.to_string();
		self.idents[p] = id.to_string();
		self.names[p] = name.to_vec();
		self.dupes[p] = 1;

		self.keys[depth - 1].clone()
	}

	pub fn row(&self, x: usize) -> (&str, &str, &[u8], u32) {
		(&self.keys[x], &self.idents[x], &self.names[x], self.dupes[x])
	}

	/// Size table. With `ellipsis`, repeated sizes collapse visually so
	/// same-content runs stand out.
	pub fn report_by_size(&self, title: &str, ellipsis: bool) {
		println!("{title}");
		println!("POS   HEX SIZE   -----SIZE-----   #  FILENAME");
		let mut last: i64 = -1;
		for x in 0..self.depth() {
			let dec = i64::from_str_radix(&self.keys[x], 16).unwrap_or(0);
			if !ellipsis || dec != last {
				println!(
					"{:2}:  {:>10}{:>16} {:3}  {}",
					x + 1,
					self.keys[x],
					with_commas(dec),
					self.dupes[x],
					display(&self.names[x])
				);
			} else {
				println!(
					"{:2}:  {:>10}{:>16} {:3}  {}",
					x + 1,
					"   ....   ",
					"....     ",
					self.dupes[x],
					display(&self.names[x])
				);
			}
			last = dec;
		}
	}

	/// Date table.
	pub fn report_by_date(&self, title: &str) {
		println!("{title}");
		println!("POS  HEX DATE   -------------DATE------------   FILENAME");
		for x in 0..self.depth() {
			let secs = i64::from_str_radix(&self.keys[x], 16).unwrap_or(0);
			let when = DateTime::<Utc>::from_timestamp(secs, 0)
				.map(|t| t.to_rfc3339())
				.unwrap_or_default();
			println!(
				"{:2}:  {}{:>32}   {}",
				x + 1,
				self.keys[x],
				when,
				display(&self.names[x])
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keeps_the_largest_keys_in_descending_order() {
		let mut top = TopList::new(3, "00000000");
		top.add("00000005", "e", b"e");
		top.add("00000009", "i", b"i");
		top.add("00000001", "a", b"a");
		top.add("00000007", "g", b"g");
		let keys: Vec<&str> = (0..3).map(|x| top.row(x).0).collect();
		assert_eq!(keys, vec!["00000009", "00000007", "00000005"]);
	}

	#[test]
	fn add_returns_the_current_threshold() {
		let mut top = TopList::new(2, "00000000");
		assert_eq!(top.add("00000005", "e", b"e"), "00000000");
		assert_eq!(top.add("00000009", "i", b"i"), "00000005");
		assert_eq!(top.add("00000007", "g", b"g"), "00000007");
	}

	#[test]
	fn equal_identifiers_are_suppressed_with_a_count() {
		let mut top = TopList::new(3, "00000000");
		top.add("00000005", "same", b"one");
		top.add("00000005", "same", b"two");
		top.add("00000004", "other", b"three");
		let (_, _, name, dupes) = top.row(0);
		assert_eq!(name, b"one");
		assert_eq!(dupes, 2);
		assert_eq!(top.row(1).2, b"three");
	}

	#[test]
	fn depth_is_clamped() {
		let top = TopList::new(5000, "0");
		assert_eq!(top.depth(), MAX_DEPTH);
		let top = TopList::new(0, "0");
		assert_eq!(top.depth(), 1);
	}
}
