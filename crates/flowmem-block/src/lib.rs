//! Ports and the `Block` trait (spec §4.8).

mod block;
mod port;

pub use block::{Block, BlockState};
pub use port::{Direction, InputPort, OutputPort};
