//! Wire types for the Model Context Protocol subset spoken by this crate.

pub mod jsonrpc;
pub mod requests;

mod capabilities;
mod content;
mod logging;
mod prompts;
mod resources;
mod sampling;
mod tools;

pub use capabilities::*;
pub use content::*;
pub use jsonrpc::*;
pub use logging::*;
pub use prompts::*;
pub use requests::*;
pub use resources::*;
pub use sampling::*;
pub use tools::*;
