pub mod complexity;
pub mod detector;
pub mod extract;
pub mod file_collect;
pub mod language;
pub mod parser;

pub use complexity::*;
pub use detector::*;
pub use extract::*;
pub use file_collect::*;
pub use language::*;
pub use parser::*;
