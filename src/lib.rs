pub mod app;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod genomics;
pub mod loader;
pub mod metadata;
pub mod model;
pub mod output;
pub mod project;
pub mod selection;
