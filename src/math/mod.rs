pub mod interpolate;
pub mod physics;
pub mod radiation;
pub mod solar;


pub use interpolate::*;
pub use physics::*;
pub use radiation::*;
pub use solar::*;
