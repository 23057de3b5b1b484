#![forbid(unsafe_code)]

pub mod actions;
pub mod correlation;
pub mod delivery;
pub mod error_log;
pub mod fanout;
pub mod health;
pub mod hub;
pub mod normalize;
pub mod webhook;
pub mod ws;



#[cfg(test)]
mod hub_tests;

#[cfg(test)]
mod normalize_tests;
