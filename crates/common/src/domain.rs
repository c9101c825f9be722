mod device;
mod directive;
mod result;
mod sample;

pub use device::*;
pub use directive::*;
pub use result::*;
pub use sample::*;
