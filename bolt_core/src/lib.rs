#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core lock control plane (hardware-agnostic).
//!
//! This crate holds everything that makes the deadbolt controller a
//! controller; all hardware interactions go through the `bolt_traits` seams
//! (`Servo`, `AnalogInput`, `NonceStore`, `StatusPanel`, `Watchdog`).
//!
//! ## Architecture
//!
//! - **Sensing**: trimmed-mean feedback reads with dual powered/released
//!   anchor tables (`sensor` module)
//! - **Actuation**: idempotent attach/detach over the switched supply
//!   (`actuator` module)
//! - **Authentication**: HMAC-SHA256 plus a persistent monotonic-nonce
//!   replay floor (`auth` module)
//! - **Wire surface**: bounded single-request HTTP parser and response
//!   matrix (`http` module)
//! - **Intent**: the seven-state lock machine (`fsm` module)
//! - **Orchestration**: the ~10 Hz cooperative tick (`server` module)
//!
//! Time is abstracted behind `bolt_traits::Clock` so every timeout in the
//! crate is deterministic under test.

pub mod actuator;
pub mod auth;
pub mod display;
pub mod error;
pub mod fsm;
pub mod http;
pub mod mocks;
pub mod sensor;
pub mod server;
pub mod state;

pub use actuator::Actuator;
pub use auth::{RequestAuth, REPLAY_WINDOW};
pub use display::DisplayMirror;
pub use error::{BuildError, LockError};
pub use fsm::{FsmConfig, LockFsm};
pub use http::Request;
pub use sensor::{FeedbackTable, PositionSensor};
pub use server::{LockServer, ServerConfig};
pub use state::{Command, LockState};
