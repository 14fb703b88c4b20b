//! The broadcast port queue (spec §4.7).

mod port_queue;

pub use port_queue::PortQueue;
