pub mod coord;
pub mod error;
pub mod reference;
pub mod value;

pub use coord::*;
pub use error::*;
pub use reference::*;
pub use value::*;
