// Websocket and metrics HTTP surface

pub mod example;
pub mod server;
pub mod ws;

pub use example::ExampleStore;
pub use server::{AppState, WebServer};
