//! dropwire-http — reqwest transport and settings loader for Dropwire.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dropwire_core::{RequestSpec, StaticCredential};
//! use dropwire_http::Settings;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let ctx = settings.build_context(Arc::new(StaticCredential::new("token")))?;
//! let payload = ctx.execute("usage.current", RequestSpec::get("usage")).await?;
//! println!("{}", String::from_utf8_lossy(&payload.body));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;

pub use client::{ClientConfig, ReqwestTransport};
pub use config::{ConfigError, Settings};
