//! Command handlers for CLI subcommands
//!
//! Each handler turns parsed arguments and the effective configuration into
//! calls on `trackrest-core`, then prints through the [`OutputWriter`].
//!
//! [`OutputWriter`]: crate::output::OutputWriter

mod call;
mod completions;
mod config;
mod endpoints;
mod request;
mod storage;
mod utils;

pub use call::handle_call;
pub use completions::handle_completions;
pub use config::handle_config;
pub use endpoints::handle_endpoints;
pub use request::handle_request;
pub use storage::{handle_download, handle_upload};
