//! DPCM sample index (spec.md §6, "Input — DPCM sample index").
//!
//! The core never decodes audio; it only references slots by integer
//! index and reads enough metadata to emit the DMC registers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata for one drum-kit slot. `sample_bytes` is the raw DPCM-encoded
/// sample data as supplied by the caller (already delta-modulated);
/// `sample_rate_index` selects the DMC rate table entry (0-15).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpcmSample {
    pub sample_bytes: Vec<u8>,
    pub sample_rate_index: u8,
    pub loop_flag: bool,
}

/// A JSON-shaped mapping from drum-kit slot (MIDI drum index) to sample
/// metadata, supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DpcmSampleTable {
    pub samples: BTreeMap<u8, DpcmSample>,
}

impl DpcmSampleTable {
    pub fn get(&self, slot: u8) -> Option<&DpcmSample> {
        self.samples.get(&slot)
    }

    pub fn contains(&self, slot: u8) -> bool {
        self.samples.contains_key(&slot)
    }
}
