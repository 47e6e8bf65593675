mod body;
mod connector;
mod dns;
mod errors;
mod message;
mod processor;
mod session;
mod task;
mod transport;

pub use body::*;
pub use connector::*;
pub use dns::*;
pub use errors::*;
pub use message::*;
pub use processor::*;
pub use session::*;
pub use task::*;
pub use transport::*;
