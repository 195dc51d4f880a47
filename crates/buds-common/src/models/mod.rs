//! Domain model types shared between the repository layer and the API layer.

pub mod device;
pub mod jar;
pub mod lookup;
pub mod message;

pub use device::*;
pub use jar::*;
pub use lookup::*;
pub use message::*;
