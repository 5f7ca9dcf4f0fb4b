//! # CoachHub API Server Library
//!
//! HTTP layer of CoachHub: configuration, routing, middleware and handlers.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Security headers and rate limiting
//! - `pagination`: Query parameters and metadata for list endpoints
//! - `response`: Success envelope
//! - `routes`: API route handlers
//! - `services`: Email delivery, invoice rendering and CSV export

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod pagination;
pub mod response;
pub mod routes;
pub mod services;
