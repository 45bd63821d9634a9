//! Entry points for the two ways of running code.

pub mod playground;
pub mod run;
