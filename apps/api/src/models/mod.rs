pub mod api_key;
pub mod cdi;
pub mod code;
pub mod subscription;
pub mod usage;
pub mod user;
