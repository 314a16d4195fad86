/// Per-tool MAC configuration. Only the fields relevant to the selected
/// adapter are consulted; the rest are ignored, the way `drv-spi-api`'s
/// device index is ignored by backends that don't multiplex devices.
#[derive(Debug, Clone)]
pub struct MacConfig {
    pub path: String,
    pub baud: u32,
    pub spi_mode: u8,
    pub spi_speed_hz: u32,
    pub i2c_address: u16,
    pub tcp_port: u16,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            path: String::new(),
            baud: 115_200,
            spi_mode: 0,
            spi_speed_hz: 1_000_000,
            i2c_address: 0x2b,
            tcp_port: 5_500,
        }
    }
}
