pub mod controls;
pub mod memory;
pub mod network;
pub mod virtual_device;
