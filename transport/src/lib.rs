//! Host-side real-time I/Q transport and job dispatch core for a DECT-2020 NR
//! software-defined-radio PHY.
//!
//! This crate sits between an SDR device and the upper PHY/MAC workers. It
//! owns five concurrent contracts:
//!
//! - [`radio::buffer_tx_pool`] / [`radio::buffer_tx`]: a transmit buffer pool
//!   many PHY workers fill in parallel while one TX thread ([`radio::tx_thread`])
//!   drains them in strict transmission-time order.
//! - [`radio::buffer_rx`]: a receive ring buffer fed by a single radio thread,
//!   publishing a monotonic samples-elapsed timeline many consumers wait on.
//! - [`phy::job_queue`]: a multi-producer/multi-consumer FIFO of [`phy::job::Job`]s.
//! - [`application::queue`] / [`application::ingress`]: a datagram queue
//!   fronting an external UDP/TUN server, throttled to at most one job per
//!   datagram.
//! - [`radio::pps_sync`]: a monotonic watch / PPS synchronization primitive
//!   that aligns the sample counter across multiple radios.
//!
//! Device-specific drivers, DECT signal processing, and calibration tables
//! are out of scope; [`radio::hw`] specifies only the abstract hardware
//! interface and ships an in-process [`radio::hw::SimulatedHw`].

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

pub mod application;
pub mod common;
pub mod config;
pub mod error;
pub mod logging;
pub mod phy;
pub mod radio;

pub use error::{Result, TransportError};
