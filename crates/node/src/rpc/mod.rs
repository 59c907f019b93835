//! HTTP gateway for the node.
//!
//! Read-only by design: consensus state is published to the gateway through
//! [`crate::NodeStatus`] and the block store; nothing here reaches into the
//! engine. All `/api/v1` routes sit behind the per-IP rate limiter.

mod handlers;
mod ratelimit;
mod routes;
mod server;

pub use handlers::GatewayState;
pub use ratelimit::{client_ip, rate_limit_middleware, RateLimiter};
pub use routes::create_router;
pub use server::{Gateway, GatewayConfig, GatewayError, GatewayHandle};
