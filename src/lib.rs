#[macro_use]
extern crate lazy_static;

pub mod base;
pub mod caller;
pub mod cbdg;
pub mod cli;
pub mod core;
pub mod hts;
