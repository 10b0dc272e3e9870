pub mod api;
pub mod app;
pub mod capture;
pub mod cli;
pub mod config;
pub mod db;
pub mod global;
pub mod meeting;
pub mod merge;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;
