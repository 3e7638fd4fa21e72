//! # Futside
//!
//! Backend for coordinating pickup football matches. A REST gateway stores
//! users, courts and matches; every accepted change is announced as a JSON
//! event on a per-match or per-city topic so mobile apps can follow it live,
//! and users who opted in get push notifications.
//!
//! ## Core Modules
//!
//! - `api`: axum router, handlers and the JSON error body.
//! - `service`: the operations behind the API (validate, persist, publish).
//! - `domain`: users, fields, matches and the match state rules.
//! - `persistence`: sled-backed store and broker replay history.
//! - `relay`: event envelopes, topic naming and the publisher backends.
//! - `broker`: the embedded topic broker, with acknowledgements and retries.
//! - `transport`: the broker's WebSocket server and frame types.
//! - `client`: a connected broker subscriber.
//! - `push`: push notifications through Firebase Cloud Messaging.
//! - `seed`: the public courts of Asa Sul.
//! - `config`: layered configuration loading.
//! - `utils`: the startup error type and logging setup.

pub mod api;
pub mod broker;
pub mod client;
pub mod config;
pub mod domain;
pub mod persistence;
pub mod push;
pub mod relay;
pub mod seed;
pub mod service;
pub mod transport;
pub mod utils;
