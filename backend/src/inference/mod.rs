pub mod download;
pub mod loader;
pub mod model;
pub mod preprocess;
pub mod service;
pub mod validation;
