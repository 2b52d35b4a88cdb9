pub mod attrs;
pub mod coords;
pub mod nddata;
pub mod ops;
pub mod reduce;

pub use attrs::{AttrValue, Attrs};
pub use coords::Coords;
pub use nddata::{concat, AssignValue, NDData, Selector};
pub use ops::align;
