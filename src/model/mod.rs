pub mod change;
pub mod changeset;
pub mod common;
pub mod entity;
pub mod onestop_id;

pub use change::*;
pub use changeset::*;
pub use common::*;
pub use entity::*;
pub use onestop_id::*;
