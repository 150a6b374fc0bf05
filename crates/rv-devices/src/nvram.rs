//! Battery-backed NVRAM: a flat byte store most addresses read/write through
//! to directly, plus a DS1216-compatible real-time calendar multiplexed onto
//! offset `0x03`, plus a small filesystem format for `startup-config` /
//! `private-config` blobs used by `vm save_config` and at boot.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use memmap2::MmapMut;

#[derive(Debug, thiserror::Error)]
pub enum NvramError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("offset {0} out of bounds for {1}-byte NVRAM")]
    OutOfBounds(usize, usize),
    #[error("config checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },
    #[error("config blob offset/length exceeds NVRAM size")]
    ConfigOutOfBounds,
}

/// Storage backing for an [`NvramDevice`] — a real mapped file or an
/// in-memory buffer, unified so calendar/filesystem logic never branches on
/// storage kind.
pub trait NvramStorage: Send {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn read(&self, offset: usize) -> u8;
    fn write(&mut self, offset: usize, val: u8);
}

pub struct MmapStorage {
    map: MmapMut,
}

impl MmapStorage {
    pub fn open(path: &Path, len: usize) -> Result<Self, NvramError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }
}

impl NvramStorage for MmapStorage {
    fn len(&self) -> usize {
        self.map.len()
    }
    fn read(&self, offset: usize) -> u8 {
        self.map[offset]
    }
    fn write(&mut self, offset: usize, val: u8) {
        self.map[offset] = val;
        // Real hardware is battery-backed SRAM; flushing here means test
        // fixtures that reopen the same path observe the write immediately.
        let _ = self.map.flush();
    }
}

pub struct VecStorage {
    data: Vec<u8>,
}

impl VecStorage {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }
}

impl NvramStorage for VecStorage {
    fn len(&self) -> usize {
        self.data.len()
    }
    fn read(&self, offset: usize) -> u8 {
        self.data[offset]
    }
    fn write(&mut self, offset: usize, val: u8) {
        self.data[offset] = val;
    }
}

const CALENDAR_OFFSET: usize = 0x03;
const TICKLE_PATTERN: u64 = 0x5ca3_3ac5_5ca3_3ac5;

#[derive(Default)]
struct CalendarState {
    /// Bits of the tickle pattern matched so far, MSB first per the chip's
    /// one-bit-per-access protocol.
    tickle_bits_seen: u32,
    armed: bool,
    /// Once armed, the next 64 accesses shift out this BCD payload one bit
    /// at a time.
    read_shift: u64,
    read_bits_left: u32,
}

fn bcd(v: u32) -> u8 {
    (((v / 10) << 4) | (v % 10)) as u8
}

/// Packs the host's local time into the chip's 64-bit calendar word: second
/// at bits 8-15, minute at 16-23, hour at 24-31, weekday at 32-39, day of
/// month at 40-47, month at 48-55, two-digit year at 56-63, each BCD-coded.
/// Bits 0-7 are unused and stay zero.
fn bcd_payload() -> u64 {
    use chrono::{Datelike, Local, Timelike};

    let now = Local::now();
    let second = bcd(now.second()) as u64;
    let minute = bcd(now.minute()) as u64;
    let hour = bcd(now.hour()) as u64;
    let weekday = bcd(now.weekday().num_days_from_sunday()) as u64;
    let day = bcd(now.day()) as u64;
    let month = bcd(now.month()) as u64;
    let year = bcd((now.year().rem_euclid(100)) as u32) as u64;

    (second << 8) | (minute << 16) | (hour << 24) | (weekday << 32) | (day << 40) | (month << 48) | (year << 56)
}

/// A mapped NVRAM region presenting byte pass-through plus the DS1216
/// calendar protocol at [`CALENDAR_OFFSET`].
pub struct NvramDevice {
    storage: Box<dyn NvramStorage>,
    calendar: CalendarState,
}

impl NvramDevice {
    pub fn new(storage: Box<dyn NvramStorage>) -> Self {
        Self {
            storage,
            calendar: CalendarState::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// True the first time the whole region reads as zero; callers use this
    /// to set configuration-register bit `0x0040` ("ignore NVRAM contents").
    pub fn is_blank(&self) -> bool {
        (0..self.len()).all(|i| self.storage.read(i) == 0)
    }

    pub fn read_byte(&mut self, offset: usize) -> Result<u8, NvramError> {
        if offset >= self.len() {
            return Err(NvramError::OutOfBounds(offset, self.len()));
        }
        if offset == CALENDAR_OFFSET && self.calendar.armed {
            let bit = ((self.calendar.read_shift >> 63) & 1) as u8;
            self.calendar.read_shift <<= 1;
            self.calendar.read_bits_left -= 1;
            if self.calendar.read_bits_left == 0 {
                self.calendar.armed = false;
            }
            return Ok(bit);
        }
        Ok(self.storage.read(offset))
    }

    pub fn write_byte(&mut self, offset: usize, val: u8) -> Result<(), NvramError> {
        if offset >= self.len() {
            return Err(NvramError::OutOfBounds(offset, self.len()));
        }
        if offset == CALENDAR_OFFSET {
            let bit = (val & 1) as u64;
            let pattern_bit = (TICKLE_PATTERN >> (63 - self.calendar.tickle_bits_seen)) & 1;
            if bit == pattern_bit {
                self.calendar.tickle_bits_seen += 1;
                if self.calendar.tickle_bits_seen == 64 {
                    self.calendar.armed = true;
                    self.calendar.read_shift = bcd_payload();
                    self.calendar.read_bits_left = 64;
                    self.calendar.tickle_bits_seen = 0;
                }
                return Ok(());
            }
            self.calendar.tickle_bits_seen = 0;
        }
        self.storage.write(offset, val);
        Ok(())
    }
}

const CONFIG_MAGIC: u16 = 0xFEED;

/// Writes a `{magic, checksum, len, data}` config blob at `offset`.
pub fn push_config(
    nvram: &mut NvramDevice,
    offset: usize,
    data: &[u8],
) -> Result<(), NvramError> {
    let header_len = 8;
    if offset + header_len + data.len() > nvram.len() {
        return Err(NvramError::ConfigOutOfBounds);
    }
    let checksum = checksum16(data);
    let mut header = Vec::with_capacity(header_len);
    header.extend_from_slice(&CONFIG_MAGIC.to_be_bytes());
    header.extend_from_slice(&checksum.to_be_bytes());
    header.extend_from_slice(&(data.len() as u32).to_be_bytes());
    for (i, b) in header.iter().chain(data.iter()).enumerate() {
        nvram.write_byte(offset + i, *b)?;
    }
    Ok(())
}

/// Reads back a config blob written by [`push_config`], validating its
/// checksum.
pub fn extract_config(nvram: &mut NvramDevice, offset: usize) -> Result<Vec<u8>, NvramError> {
    let mut header = [0u8; 8];
    for (i, b) in header.iter_mut().enumerate() {
        *b = nvram.read_byte(offset + i)?;
    }
    let magic = u16::from_be_bytes([header[0], header[1]]);
    let stored_checksum = u16::from_be_bytes([header[2], header[3]]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if magic != CONFIG_MAGIC {
        return Ok(Vec::new());
    }
    if offset + 8 + len > nvram.len() {
        return Err(NvramError::ConfigOutOfBounds);
    }
    let mut data = Vec::with_capacity(len);
    for i in 0..len {
        data.push(nvram.read_byte(offset + 8 + i)?);
    }
    let computed = checksum16(&data);
    if computed != stored_checksum {
        return Err(NvramError::ChecksumMismatch {
            stored: stored_checksum,
            computed,
        });
    }
    Ok(data)
}

fn checksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [a, b] => u16::from_be_bytes([*a, *b]),
            [a] => u16::from_be_bytes([*a, 0]),
            _ => unreachable!(),
        };
        sum = sum.wrapping_add(word as u32);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_bits() -> Vec<u8> {
        (0..64)
            .map(|i| ((TICKLE_PATTERN >> (63 - i)) & 1) as u8)
            .collect()
    }

    #[test]
    fn pass_through_read_write_outside_calendar_offset() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(64)));
        dev.write_byte(0x10, 0x42).unwrap();
        assert_eq!(dev.read_byte(0x10).unwrap(), 0x42);
    }

    #[test]
    fn calendar_tickle_then_read_yields_bcd_bits() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(64)));
        for bit in pattern_bits() {
            dev.write_byte(CALENDAR_OFFSET, bit).unwrap();
        }
        assert!(dev.calendar.armed);
        let mut bits = Vec::new();
        for _ in 0..64 {
            bits.push(dev.read_byte(CALENDAR_OFFSET).unwrap());
        }
        assert!(!dev.calendar.armed, "calendar disarms after 64 read bits");
        // Every returned value is a valid single bit.
        assert!(bits.iter().all(|b| *b <= 1));
    }

    #[test]
    fn mismatched_tickle_bit_resets_progress() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(64)));
        let bits = pattern_bits();
        for bit in &bits[..32] {
            dev.write_byte(CALENDAR_OFFSET, *bit).unwrap();
        }
        // Corrupt progress with the wrong bit, then restart the whole pattern.
        dev.write_byte(CALENDAR_OFFSET, 1 - bits[32]).unwrap();
        for bit in &bits {
            dev.write_byte(CALENDAR_OFFSET, *bit).unwrap();
        }
        assert!(dev.calendar.armed);
    }

    #[test]
    fn calendar_payload_encodes_current_local_date() {
        use chrono::Datelike;

        let mut dev = NvramDevice::new(Box::new(VecStorage::new(64)));
        let before = chrono::Local::now();
        for bit in pattern_bits() {
            dev.write_byte(CALENDAR_OFFSET, bit).unwrap();
        }
        let mut value: u64 = 0;
        for _ in 0..64 {
            value = (value << 1) | dev.read_byte(CALENDAR_OFFSET).unwrap() as u64;
        }
        let after = chrono::Local::now();

        let from_bcd = |b: u8| -> u32 { ((b >> 4) as u32) * 10 + (b & 0x0F) as u32 };
        let byte_at = |shift: u32| -> u8 { ((value >> shift) & 0xFF) as u8 };

        let year = from_bcd(byte_at(56));
        let month = from_bcd(byte_at(48));
        let day = from_bcd(byte_at(40));

        assert!(year == (before.year() as u32) % 100 || year == (after.year() as u32) % 100);
        assert!(month == before.month() || month == after.month());
        assert!(day == before.day() || day == after.day());
    }

    #[test]
    fn is_blank_detects_all_zero_region() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(16)));
        assert!(dev.is_blank());
        dev.write_byte(4, 1).unwrap();
        assert!(!dev.is_blank());
    }

    #[test]
    fn config_push_and_extract_round_trips() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(256)));
        let payload = b"hostname router1\nend\n".to_vec();
        push_config(&mut dev, 0x20, &payload).unwrap();
        let back = extract_config(&mut dev, 0x20).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn config_extract_detects_corruption() {
        let mut dev = NvramDevice::new(Box::new(VecStorage::new(256)));
        push_config(&mut dev, 0x20, b"startup config data").unwrap();
        dev.write_byte(0x20 + 8 + 2, b'X').unwrap();
        let err = extract_config(&mut dev, 0x20).unwrap_err();
        assert!(matches!(err, NvramError::ChecksumMismatch { .. }));
    }

    #[test]
    fn mmap_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        {
            let storage = MmapStorage::open(&path, 128).unwrap();
            let mut dev = NvramDevice::new(Box::new(storage));
            dev.write_byte(5, 0x77).unwrap();
        }
        let storage = MmapStorage::open(&path, 128).unwrap();
        let mut dev = NvramDevice::new(Box::new(storage));
        assert_eq!(dev.read_byte(5).unwrap(), 0x77);
    }
}
