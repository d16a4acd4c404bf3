pub mod commitment;
pub mod device;
pub mod schedule;
pub mod types;

pub use commitment::*;
pub use device::*;
pub use schedule::*;
pub use types::*;
