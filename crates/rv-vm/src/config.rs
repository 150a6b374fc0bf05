//! Platform configuration: sizing and identity values supplied by whatever
//! constructs a [`crate::VmInstance`] (a concrete `c1700`/`c2600`/... platform
//! module, out of scope for this core). Serializable only where these values
//! actually cross a persistence boundary (saved hypervisor config, NVRAM
//! filesystem header) — function pointers and device handles never are.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub platform_name: String,
    pub ram_size: u32,
    pub rom_size: u32,
    pub nvram_size: u32,
    pub iomem_size: u32,
    pub clock_divisor: u32,
    pub chassis_cookie: Vec<u8>,
    pub slot_count: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform_name: "generic".to_string(),
            ram_size: 128 * 1024 * 1024,
            rom_size: 4 * 1024 * 1024,
            nvram_size: 224 * 1024,
            iomem_size: 8 * 1024 * 1024,
            clock_divisor: 8,
            chassis_cookie: vec![0u8; 64],
            slot_count: 16,
        }
    }
}
