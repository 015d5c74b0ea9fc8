//! Client-side session control for a multi-camera object-detection backend: camera list,
//! analyzer status, camera switching with bounded polling, and recent detection frames.

#[macro_use] extern crate rocket;
#[macro_use] extern crate serde_derive;

pub mod backend;
pub mod common;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod registry;
pub mod selection;
pub mod simulator;
pub mod status;
pub mod switch;

pub use crate::error::{SessionError, SessionResult};
