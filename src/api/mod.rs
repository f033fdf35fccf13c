pub mod cookies;
pub mod services;
