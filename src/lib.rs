#![forbid(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod convert;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod manifest;
pub mod page;
pub mod run;
pub mod sanitize;
