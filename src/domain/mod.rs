//! Domain layer - Volume model and port definitions
//!
//! The provisioners in [`crate::provisioners`] only talk to the outside
//! world through the traits defined here.

pub mod ports;

pub use ports::*;
