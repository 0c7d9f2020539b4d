pub mod activate;
pub mod config;
pub mod download;
pub mod extract;
pub mod http;
pub mod manifest;
pub mod outcome;
pub mod pipeline;
pub mod settings;
pub mod version;
