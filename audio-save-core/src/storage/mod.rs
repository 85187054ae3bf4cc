pub mod local_file;
pub mod metadata;
pub mod settings;
