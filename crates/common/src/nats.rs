mod client;
mod trace_context;

pub use client::*;
pub use trace_context::*;
