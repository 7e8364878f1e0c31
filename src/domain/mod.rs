//! Domain entities and the ports the application layer talks through.

pub mod order;
pub mod payment;
pub mod pickup;
pub mod ports;
