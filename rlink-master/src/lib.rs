//! Job master of the rlink streaming runtime.
//!
//! logical job graph -> execution graph -> resource placement -> remote workers

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate atomic_enum;

pub mod api;
pub mod error;
pub mod graph;
pub mod logger;
pub mod master;
pub mod metrics;
pub mod resource;
pub mod utils;

pub use crate::error::{MasterError, Result};
