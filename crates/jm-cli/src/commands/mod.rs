//! CLI command implementations

mod call;
mod config;
mod discover;
mod keys;
mod list;
mod methods;
mod probe;

pub use call::{call_command, forward_command};
pub use config::{config_init, config_path, config_show};
pub use discover::discover_command;
pub use keys::{keys_authorize, keys_init, keys_show};
pub use list::{list_command, scan_command};
pub use methods::methods_command;
pub use probe::probe_command;
