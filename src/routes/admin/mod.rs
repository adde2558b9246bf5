mod logout;
mod queue;
mod send;
mod stats;

pub use logout::*;
pub use queue::*;
pub use send::*;
pub use stats::*;
