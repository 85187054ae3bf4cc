pub mod backend_sink;
pub mod device_handle;
pub mod save_delegate;
pub mod settings_store;
