//! Core library for the labdeck liquid-handling controller.
//!
//! The crate keeps track of labware on a robot deck, decides which positions
//! each head action uses, and drives protocols as resumable sequences of
//! guarded steps:
//!
//! - [`position`], [`pairing`], [`frame`]: well addressing and channel allocation
//! - [`labware`], [`stack`], [`deck`], [`layout`]: the physical inventory
//! - [`state`], [`scheduler`], [`run`]: durable run state and step execution
//! - [`driver`], [`operator`], [`retry`]: the robot, the human, and whole-method retry
//! - [`mapping`], [`protocol`]: tabular inputs and the built-in protocols

pub mod config;
pub mod deck;
pub mod driver;
pub mod error;
pub mod frame;
pub mod labware;
pub mod layout;
pub mod logging;
pub mod mapping;
pub mod operator;
pub mod pairing;
pub mod persist;
pub mod position;
pub mod protocol;
pub mod retry;
pub mod run;
pub mod scheduler;
pub mod stack;
pub mod state;

pub use error::{DeckError, DeckResult};
