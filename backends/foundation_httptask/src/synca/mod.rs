mod mailbox;
mod signals;

pub use mailbox::*;
pub use signals::*;
