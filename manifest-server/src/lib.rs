//! HTTP boundary for the live-window engine.
//!
//! A thin axum layer: every route maps straight onto a serializer or stats
//! call on [`live_window::LiveEngine`]. Handlers hold no state of their own
//! and only ever take the engine's read paths, so they are safe for
//! unbounded concurrent invocation.
//!
//! # Endpoints
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /playlist.m3u8` | Master manifest, or the media manifest for a single-variant source |
//! | `GET /variant/{index}/playlist.m3u8` | Media manifest for one variant |
//! | `GET /health` | JSON health document |
//! | `GET /cluster/status` | JSON leadership document (clustered mode only) |

pub mod routes;

pub use routes::{manifest_router, serve};
