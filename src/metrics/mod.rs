pub mod poller;
pub mod recorder;
pub mod sink;

pub use poller::*;
pub use recorder::*;
pub use sink::*;
