//! Cisco EEPROM v4 codec: a word-addressed, big-endian byte array holding a
//! sequence of `{type, length, value}` fields terminated by type `0xFF`.
//!
//! The storage is logically an array of 16-bit big-endian words even though
//! fields are addressed byte-wise — odd/even offsets select the low/high
//! half of a word, matching the original chip's 16-bit-wide access path.

#[derive(Debug, thiserror::Error)]
pub enum EepromError {
    #[error("offset {0} is out of bounds for a {1}-byte EEPROM")]
    OutOfBounds(usize, usize),
    #[error("field type {0:#04x} not present")]
    FieldNotFound(u8),
}

/// Field type terminating the v4 field sequence.
pub const FIELD_END: u8 = 0xFF;
/// Field type carrying the chassis MAC base address, patched at chassis init.
pub const FIELD_MAC_BASE: u8 = 0xCF;

pub struct CiscoEeprom {
    words: Vec<u16>,
}

impl CiscoEeprom {
    pub fn new(len_words: usize) -> Self {
        Self {
            words: vec![0u16; len_words],
        }
    }

    pub fn from_words(words: Vec<u16>) -> Self {
        Self { words }
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * 2
    }

    pub fn get_byte(&self, offset: usize) -> Result<u8, EepromError> {
        if offset >= self.len_bytes() {
            return Err(EepromError::OutOfBounds(offset, self.len_bytes()));
        }
        let word = self.words[offset >> 1];
        Ok(if offset & 1 == 0 {
            (word >> 8) as u8
        } else {
            (word & 0xFF) as u8
        })
    }

    pub fn set_byte(&mut self, offset: usize, val: u8) -> Result<(), EepromError> {
        if offset >= self.len_bytes() {
            return Err(EepromError::OutOfBounds(offset, self.len_bytes()));
        }
        let word = &mut self.words[offset >> 1];
        *word = if offset & 1 == 0 {
            (*word & 0x00FF) | ((val as u16) << 8)
        } else {
            (*word & 0xFF00) | val as u16
        };
        Ok(())
    }

    pub fn get_region(&self, offset: usize, len: usize) -> Result<Vec<u8>, EepromError> {
        (0..len).map(|i| self.get_byte(offset + i)).collect()
    }

    pub fn set_region(&mut self, offset: usize, data: &[u8]) -> Result<(), EepromError> {
        for (i, b) in data.iter().enumerate() {
            self.set_byte(offset + i, *b)?;
        }
        Ok(())
    }

    /// Reads one `{type, len}` header starting at `*offset`, advancing
    /// `*offset` past the header (not past the value). Returns `None` at the
    /// terminator field or end of storage.
    fn read_field_header(&self, offset: &mut usize) -> Result<Option<(u8, u8)>, EepromError> {
        let field_type = self.get_byte(*offset)?;
        *offset += 1;
        if field_type == FIELD_END {
            return Ok(None);
        }
        let tag = (field_type >> 6) & 0x03;
        let len = if tag == 0x03 {
            let extra = self.get_byte(*offset)?;
            *offset += 1;
            extra & 0x0F
        } else {
            1u8 << tag
        };
        Ok(Some((field_type, len)))
    }

    /// Walks every field, invoking `visit(type, value_offset, len)` for each.
    pub fn for_each_field(
        &self,
        mut visit: impl FnMut(u8, usize, u8),
    ) -> Result<(), EepromError> {
        let mut offset = 2;
        while offset < self.len_bytes() {
            let Some((field_type, len)) = self.read_field_header(&mut offset)? else {
                break;
            };
            visit(field_type, offset, len);
            offset += len as usize;
        }
        Ok(())
    }

    pub fn find_field(&self, field_type: u8) -> Result<(usize, u8), EepromError> {
        let mut found = None;
        self.for_each_field(|t, off, len| {
            if t == field_type && found.is_none() {
                found = Some((off, len));
            }
        })?;
        found.ok_or(EepromError::FieldNotFound(field_type))
    }

    pub fn dump(&self) -> Result<Vec<(u8, Vec<u8>)>, EepromError> {
        let mut fields = Vec::new();
        self.for_each_field(|t, off, len| {
            if let Ok(bytes) = self.get_region(off, len as usize) {
                fields.push((t, bytes));
            }
        })?;
        Ok(fields)
    }

    /// Patches the MAC-base field (if present) in place with a MAC derived
    /// from chassis identity, matching field `0xCF` at chassis init.
    pub fn patch_mac_base(
        &mut self,
        platform_msb: u8,
        instance_id: u8,
        pid: u16,
        slot: u8,
    ) -> Result<(), EepromError> {
        let (offset, len) = self.find_field(FIELD_MAC_BASE)?;
        let mac = derive_mac(platform_msb, instance_id, pid, slot);
        let n = (len as usize).min(mac.len());
        self.set_region(offset, &mac[..n])
    }
}

fn derive_mac(platform_msb: u8, instance_id: u8, pid: u16, slot: u8) -> [u8; 6] {
    let [pid_hi, pid_lo] = pid.to_be_bytes();
    [platform_msb, instance_id, pid_hi, pid_lo, slot, 0x00]
}
