//! Integration tests with in-process and mock HTTP replicas

pub mod http_api;
pub mod replica_http;
pub mod scenarios;
