#[macro_use]
extern crate log;

pub mod average;
pub mod bedgraph;
pub mod bigwig;
pub mod convert;
pub mod counts;
pub mod error;
pub mod external;
pub mod factors;
pub mod genome;
pub mod regions;
pub mod sample;
pub mod scaler;
mod table;
pub mod track;
pub mod wiggle;

pub use error::{CoreError, Result};
