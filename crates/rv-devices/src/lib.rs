//! Per-peripheral MMIO devices: EEPROM codec, NVRAM/calendar, DS1620
//! temperature sensor, NS16552 DUART, Galileo system controllers, the
//! NM-16ESW switch ASIC, the ROMMON variable store, and the remote-control
//! window that ties several of them together for ROM monitor code.

pub mod bcm5600;
pub mod ds1620;
pub mod duart;
pub mod eeprom;
pub mod galileo;
pub mod nvram;
pub mod remote;
pub mod rommon;
pub mod vtty;

pub use bcm5600::Bcm5600;
pub use ds1620::Ds1620;
pub use duart::Duart;
pub use eeprom::{CiscoEeprom, EepromError};
pub use galileo::{Galileo, GalileoVariant, PciConfigTarget};
pub use nvram::{MmapStorage, NvramDevice, NvramError, NvramStorage, VecStorage};
pub use remote::{ChassisSizes, RemoteControl, RemoteControlHost};
pub use rommon::RommonVarStore;
pub use vtty::{RingVtty, Vtty};
