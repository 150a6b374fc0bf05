//! ROMMON variable store: a flat name=value environment consulted through a
//! 512-byte streaming window plus a command register, mirroring how the
//! remote-control device (§`0x054`/`0x058`) exposes it to guest ROM monitor
//! code without a dedicated MMIO range per variable.

use std::collections::BTreeMap;

const WINDOW_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RommonCommand {
    SetVar,
    GetVar,
    ClearVarStat,
}

impl RommonCommand {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::SetVar),
            1 => Some(Self::GetVar),
            2 => Some(Self::ClearVarStat),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct RommonVarStore {
    vars: BTreeMap<String, String>,
    window: [u8; WINDOW_LEN],
    status_cleared: bool,
}

impl RommonVarStore {
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
            window: [0u8; WINDOW_LEN],
            status_cleared: true,
        }
    }

    /// Writes into the 512-byte window at `offset` (the "name=value" text
    /// form the guest stages before issuing `SET_VAR`, or that the window
    /// is refilled with after a `GET_VAR`).
    pub fn write_window(&mut self, offset: usize, data: &[u8]) {
        let end = (offset + data.len()).min(WINDOW_LEN);
        if offset >= WINDOW_LEN {
            return;
        }
        self.window[offset..end].copy_from_slice(&data[..end - offset]);
    }

    pub fn read_window(&self, offset: usize, len: usize) -> Vec<u8> {
        let end = (offset + len).min(WINDOW_LEN);
        if offset >= WINDOW_LEN {
            return Vec::new();
        }
        self.window[offset..end].to_vec()
    }

    fn window_str(&self) -> String {
        let nul = self.window.iter().position(|b| *b == 0).unwrap_or(WINDOW_LEN);
        String::from_utf8_lossy(&self.window[..nul]).into_owned()
    }

    /// Executes a command against the current window contents. `SET_VAR`
    /// expects `name=value` staged in the window; `GET_VAR` expects just
    /// `name` and refills the window with `name=value` on success (leaving
    /// it untouched, with status marked "not found", otherwise).
    pub fn execute(&mut self, command: u32) -> bool {
        match RommonCommand::from_u32(command) {
            Some(RommonCommand::SetVar) => {
                let staged = self.window_str();
                if let Some((name, value)) = staged.split_once('=') {
                    self.vars.insert(name.to_string(), value.to_string());
                    self.status_cleared = false;
                    true
                } else {
                    false
                }
            }
            Some(RommonCommand::GetVar) => {
                let name = self.window_str();
                if let Some(value) = self.vars.get(&name) {
                    let reply = format!("{name}={value}");
                    self.window = [0u8; WINDOW_LEN];
                    let bytes = reply.as_bytes();
                    let n = bytes.len().min(WINDOW_LEN);
                    self.window[..n].copy_from_slice(&bytes[..n]);
                    self.status_cleared = false;
                    true
                } else {
                    self.status_cleared = false;
                    false
                }
            }
            Some(RommonCommand::ClearVarStat) => {
                self.status_cleared = true;
                true
            }
            None => {
                tracing::trace!(command, "rommon: unknown command");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut store = RommonVarStore::new();
        store.write_window(0, b"BOOT=flash:ios.bin\0");
        assert!(store.execute(0));

        store.write_window(0, b"BOOT\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0");
        assert!(store.execute(1));
        assert_eq!(store.window_str(), "BOOT=flash:ios.bin");
    }

    #[test]
    fn get_unknown_var_fails_without_mutating_window() {
        let mut store = RommonVarStore::new();
        store.write_window(0, b"NOPE\0");
        assert!(!store.execute(1));
    }

    #[test]
    fn clear_var_stat_resets_status_flag() {
        let mut store = RommonVarStore::new();
        store.write_window(0, b"A=B\0");
        store.execute(0);
        assert!(!store.status_cleared);
        store.execute(2);
        assert!(store.status_cleared);
    }
}
