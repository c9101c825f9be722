mod client;
mod sample_repository;

pub use client::*;
pub use sample_repository::*;
