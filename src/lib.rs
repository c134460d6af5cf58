//! `filingwatch`: ingests regulatory filing feeds, downloads and sections
//! each filing, and fans sections out to summary/entity/diff LLM workers
//! sharing a daily token budget.

pub mod backpressure;
pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod http_client;
pub mod llm;
pub mod metrics_server;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod repository;
pub mod schema;
pub mod services;
pub mod storage;
pub mod utils;
