pub mod flush_scheduler;
pub mod save_engine;
