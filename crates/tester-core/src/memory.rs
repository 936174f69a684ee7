//! Emulated ECU memory
//!
//! RAM, measurement values and snapshot buffers read as zero the first time an
//! unknown location is touched. The location is created by that read and stays
//! stable afterwards, so tooling that pokes values in between polls sees them
//! reflected on the next read.

use std::collections::{BTreeMap, HashMap};

/// Size a snapshot buffer is created with.
pub const DEFAULT_SNAPSHOT_SIZE: usize = 10;
/// Snapshot buffers shorter than this are padded on access.
pub const MIN_SNAPSHOT_SIZE: usize = 10;
/// Size of the error memory buffer until something replaces it. Five zero
/// bytes read back as "no stored trouble codes".
pub const DEFAULT_ERROR_MEMORY_SIZE: usize = 5;

/// All ECU-side storage shared by the protocol decoders
#[derive(Debug, Clone)]
pub struct EcuMemory {
    ram: HashMap<u16, u8>,
    values: HashMap<u8, u32>,
    snapshots: BTreeMap<u8, Vec<u8>>,
    error_memory: Vec<u8>,
}

impl Default for EcuMemory {
    fn default() -> Self {
        Self {
            ram: HashMap::new(),
            values: HashMap::new(),
            snapshots: BTreeMap::new(),
            error_memory: vec![0; DEFAULT_ERROR_MEMORY_SIZE],
        }
    }
}

impl EcuMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // RAM
    // -------------------------------------------------------------------------

    /// Read one RAM byte, creating the location with value 0 if unseen.
    pub fn read_ram(&mut self, addr: u16) -> u8 {
        *self.ram.entry(addr).or_insert(0)
    }

    /// Read `count` consecutive RAM bytes. Addresses wrap at 0xFFFF.
    pub fn read_ram_range(&mut self, addr: u16, count: usize) -> Vec<u8> {
        (0..count)
            .map(|i| self.read_ram(addr.wrapping_add(i as u16)))
            .collect()
    }

    pub fn poke_ram(&mut self, addr: u16, value: u8) {
        self.ram.insert(addr, value);
    }

    /// Look at a RAM byte without creating it.
    pub fn peek_ram(&self, addr: u16) -> Option<u8> {
        self.ram.get(&addr).copied()
    }

    pub fn ram_locations(&self) -> usize {
        self.ram.len()
    }

    // -------------------------------------------------------------------------
    // Measurement values
    // -------------------------------------------------------------------------

    pub fn read_value(&mut self, code: u8) -> u32 {
        *self.values.entry(code).or_insert(0)
    }

    pub fn set_value(&mut self, code: u8, value: u32) {
        self.values.insert(code, value);
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Fetch a snapshot buffer, creating or padding it to the minimum size.
    pub fn snapshot(&mut self, index: u8) -> &[u8] {
        let buf = self
            .snapshots
            .entry(index)
            .or_insert_with(|| vec![0; DEFAULT_SNAPSHOT_SIZE]);
        if buf.len() < MIN_SNAPSHOT_SIZE {
            buf.resize(MIN_SNAPSHOT_SIZE, 0);
        }
        buf.as_slice()
    }

    /// Replace a snapshot buffer. Short contents are padded on next access.
    pub fn set_snapshot(&mut self, index: u8, content: Vec<u8>) {
        self.snapshots.insert(index, content);
    }

    /// Indices of all snapshot buffers created so far.
    pub fn snapshot_indices(&self) -> Vec<u8> {
        self.snapshots.keys().copied().collect()
    }

    // -------------------------------------------------------------------------
    // Error memory
    // -------------------------------------------------------------------------

    /// Stored trouble code block, as served by the KWP71 error memory read.
    pub fn error_memory(&self) -> &[u8] {
        &self.error_memory
    }

    pub fn set_error_memory(&mut self, content: Vec<u8>) {
        self.error_memory = content;
    }
}
