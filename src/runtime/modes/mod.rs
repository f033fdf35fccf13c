//! Mode routing
//!
//! - Server mode (HTTP collector, default)
//! - CLI mode (one-shot maintenance commands)

pub mod cli;
pub mod server;

pub use cli::{run_generate_config, run_inspect};
pub use server::run_server;
