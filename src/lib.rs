// Library for tests to access modules

pub mod cache;
pub mod chart;
pub mod config;
pub mod maintenance;
pub mod models;
pub mod query;
pub mod routes;
pub mod scanner;
pub mod stats_repo;
pub mod version;
