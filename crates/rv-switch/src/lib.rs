//! Software switching fabrics that sit between NIOs: a Frame-Relay switch
//! (DLCI-keyed virtual circuits, LMI) and an Ethernet switch (MAC+VLAN
//! learning and forwarding across access/trunk/ISL ports).

pub mod ethernet;
pub mod frame_relay;

pub use ethernet::{EthSwitchError, EthernetSwitch, PortMode};
pub use frame_relay::{decode_dlci, FrSwitchError, FrameRelaySwitch, DLCI_LMI_ANSI};
