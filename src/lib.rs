//! Backend toolkit for dynamic-clamp electrophysiology experiments.
//!
//! The real-time acquisition engine is an external program; this crate
//! produces the three artifacts it consumes:
//!
//! 1. Tabular stimulus files ([`stimulus`], [`parse`]): row-oriented
//!    descriptions of piecewise parameterized waveforms, including
//!    composite groups combined point-wise by `+ - x /`.
//! 2. Configuration documents ([`entity`], [`config`], [`topology`],
//!    [`defaults`]): a directed graph of typed real-time entities and
//!    non-real-time streams with parameters and connections.
//! 3. Electrode kernels ([`aec`]): the linear electrode filter estimated
//!    from a paired voltage/current recording, used by the engine to
//!    compensate the electrode artifact online.

pub mod aec;
pub mod config;
pub mod defaults;
pub mod entity;
pub mod error;
pub mod parse;
pub mod stimulus;
pub mod topology;

pub use aec::*;
pub use config::*;
pub use defaults::*;
pub use entity::*;
pub use error::{Error, Result};
pub use parse::*;
pub use stimulus::*;
pub use topology::*;
