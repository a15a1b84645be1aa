//! # imgate
//!
//! An on-demand image transformation gateway. A request names a remote image
//! and a set of operations in its query string; the gateway fetches the
//! source, applies the operations in a fixed order and answers with the
//! re-encoded bytes.
//!
//! ```text
//! GET /img/url/example.com/cat.jpg?w=200&format=png
//!
//! validate query  →  normalize URL  →  bounded fetch  →  content-type gate
//!                                                              │
//!                        ┌─────────────────────────────────────┤
//!                        ▼                                     ▼
//!                  pass through                decode → rotate → blur → resize
//!                 (original bytes)                  → sharpen → strip → export
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`request`] | Query parsing and range validation into a [`request::TransformRequest`] |
//! | [`source_url`] | Target URL normalization (scheme repair, http/https only) |
//! | [`fetch`] | Upstream HTTP client trait and the size-bounded body stream |
//! | [`gate`] | Content-type allow-list and the pass-through decision |
//! | [`imaging`] | Backend trait, the transform pipeline and format export |
//! | [`handler`] | axum handlers and the error → HTTP status mapping |
//! | [`server`] | Router, tower-http middleware, graceful shutdown |
//! | [`config`] | `imgate.toml` loading, merging over stock defaults, validation |
//!
//! # Design Decisions
//!
//! ## Validate Before Fetching
//!
//! Every parameter is range-checked before the upstream is contacted. A bad
//! `h=99999` costs nothing but a string parse, and the upstream never sees
//! traffic for requests that could not succeed.
//!
//! ## Bounded Bodies
//!
//! Upstream bodies are read through [`fetch::BoundedStream`], which fails as
//! soon as the configured ceiling (5 MiB by default) is crossed. A declared
//! `Content-Length` above the ceiling fails before any body byte is read.
//!
//! ## Never Enlarge by Default
//!
//! Resizing only shrinks unless the caller passes `up=true`. Both the
//! single-axis and two-axis plans live in
//! [`imaging::plan_resize`], a pure function with no pixel work.
//!
//! ## Statically Linked Imaging
//!
//! Decoding and encoding go through the `image` crate, with `avif-parse` and
//! `rav1d` for AVIF input and the `webp` crate's bundled libwebp for lossy
//! WebP output. There are no system codec libraries to install.
//!
//! ## Bounded Pixels
//!
//! The byte ceiling does not bound decoded size, so every decode and resize
//! is also checked against [`imaging::PixelLimits`] (`[image]` in the config).

pub mod config;
pub mod fetch;
pub mod gate;
pub mod handler;
pub mod imaging;
pub mod request;
pub mod server;
pub mod source_url;
