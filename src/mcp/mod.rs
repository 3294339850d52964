pub mod protocol;
pub mod server;
pub mod transport;

pub use server::Server;
pub use transport::run_stdio;
