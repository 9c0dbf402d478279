pub mod redis_config;
pub mod settings;
