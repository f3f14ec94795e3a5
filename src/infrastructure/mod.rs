pub mod bootstrap;
pub mod config;
pub mod locust_csv;
pub mod process_runner;
pub mod report;
pub mod storage;
pub mod store;
pub mod workspace;
