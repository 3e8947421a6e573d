mod event;
mod lease;

pub use event::*;
pub use lease::*;
