pub mod config;
pub mod devices;
pub mod scanner;
pub mod usb;

pub use config::*;
pub use devices::*;
pub use scanner::*;
pub use usb::*;
