pub mod archive;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod normalize;
pub mod pipeline;
