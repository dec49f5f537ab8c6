pub mod cli;
pub mod commands;
pub mod config;
pub mod consensus;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod popgen;
pub mod report;
pub mod repository;
pub mod stages;
pub mod supermatrix;
pub mod tools;
pub mod tree;
pub mod types;
pub mod utils;
