/// Hardware constants for supported boards.
///
/// Selected at compile time via the `board-*` feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BOARD_NAME: &str = "xiao_esp32s3";
    /// Console is the USB-Serial-JTAG port; the baud rate is nominal
    pub const CONSOLE_BAUD: u32 = 115200;
    pub const HEAP_SIZE: usize = 96 * 1024;
}

#[cfg(feature = "board-devkitc")]
mod hw {
    pub const BOARD_NAME: &str = "esp32_devkitc";
    /// UART0 through the on-board USB bridge
    pub const CONSOLE_BAUD: u32 = 921600;
    pub const HEAP_SIZE: usize = 64 * 1024;
}

#[cfg(not(any(feature = "board-xiao", feature = "board-devkitc")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
    pub const CONSOLE_BAUD: u32 = 115200;
    pub const HEAP_SIZE: usize = 64 * 1024;
}

pub use hw::*;
