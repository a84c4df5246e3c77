//! Client-side load balancing for distributed service calls.
//!
//! `baton` keeps a dynamically refreshed pool of candidate servers and
//! picks one per request with a pluggable [`rule::Rule`], informed by
//! live per-server statistics (outstanding requests, failures, circuit
//! breaker state) and zone topology. The crate does not issue requests
//! itself: callers take the chosen [`server::Server`], dispatch however
//! they like, and feed the outcome back into
//! [`stats::LoadBalancerStats`].
//!
//! ```no_run
//! use baton::balancer::{BaseLoadBalancer, LoadBalancer};
//! use baton::config::DynamicConfig;
//! use baton::rule::RoundRobinRule;
//! use baton::server::Server;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let lb = BaseLoadBalancer::builder("widgets", DynamicConfig::default())
//!     .rule(Arc::new(RoundRobinRule::new()))
//!     .build();
//! lb.add_servers(vec![Server::new("web1", 7001), Server::new("web2", 7001)]);
//!
//! if let Some(server) = lb.choose_server(None).await {
//!     let started = std::time::Instant::now();
//!     lb.stats().note_request_start(&server);
//!     // ... dispatch the request ...
//!     lb.stats().note_request_end(&server, started.elapsed().as_millis() as f64, true);
//! }
//! # }
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod ping;
pub mod predicate;
pub mod rule;
pub mod server;
pub mod source;
pub mod stats;
pub mod updater;

pub use balancer::{
    from_config, BaseLoadBalancer, DynamicServerListLoadBalancer, LoadBalancer,
    LoadBalancerHandle, ZoneAwareLoadBalancer,
};
pub use server::Server;
