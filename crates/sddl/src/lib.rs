//! Capability descriptors declared by devices.
//!
//! A device sends its descriptor in the `sddl` field of a frame: a JSON
//! object mapping each property name to its definition. Sensor properties
//! describe values the device reports; control properties describe inputs
//! the device accepts and are never ingested as samples.

mod convert;
mod datatype;
mod descriptor;
mod error;

pub use datatype::*;
pub use descriptor::*;
pub use error::*;
