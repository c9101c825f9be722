mod fabric;
mod routing_table;

pub use fabric::*;
pub use routing_table::*;
