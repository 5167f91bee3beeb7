pub mod apply;
pub mod error;
pub mod interpreter;
pub mod registry;
pub mod repository;
pub mod sequencer;
pub mod validate;

pub use apply::*;
pub use error::*;
pub use interpreter::*;
pub use registry::*;
pub use repository::*;
pub use sequencer::*;
pub use validate::*;
