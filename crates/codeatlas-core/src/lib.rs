pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod store;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use node::*;
pub use store::*;
pub use traits::*;
pub use types::*;
