//! Ingress-side surface: the per-connection datagram queue and the poll
//! loop that fronts an external UDP/TUN server.

pub mod ingress;
pub mod queue;
