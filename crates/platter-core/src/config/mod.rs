//! Configuration for platter
//!
//! - Generic YAML config loading/saving
//! - Standard config file location
//! - [`PlatterConfig`]: helper programs, library sources, termination grace
//!
//! # Usage
//!
//! ```ignore
//! use platter_core::config::{default_config_path, load_config, PlatterConfig};
//!
//! let config: PlatterConfig = load_config(&default_config_path());
//! ```

mod io;
mod paths;
mod platter;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
pub use platter::{PlatterConfig, DEFAULT_CUE_LOADER, DEFAULT_SCANNER};
