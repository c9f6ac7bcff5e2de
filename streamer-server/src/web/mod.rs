mod exchange;
mod handlers;
mod registry;
mod server;

pub use registry::HandlerRegistry;
pub use server::StreamServer;
