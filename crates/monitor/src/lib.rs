//! Support code for the `knx-usb-monitor` binary

pub mod config;
pub mod hex;

pub use config::MonitorConfig;
