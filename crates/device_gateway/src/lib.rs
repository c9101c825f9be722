mod server;
mod session;
mod transport;

pub use server::*;
pub use session::*;
pub use transport::*;
