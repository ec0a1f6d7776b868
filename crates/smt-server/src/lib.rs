//! # smt-server
//!
//! Axum server exposing the realtime notification hub:
//!
//! - `GET /api/events`: pull transport (Server-Sent Events)
//! - `GET /ws`: push transport (WebSocket with rooms and presence)
//! - `POST /api/notifications/work-order-status`: authenticated trigger
//! - `GET /health`, `GET /api/health`, `GET /metrics`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod server;
pub mod shutdown;
pub mod sse;
pub mod websocket;
