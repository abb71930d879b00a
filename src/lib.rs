//! MoonMesh chat simulator core.
//!
//! This crate is the discrete-time simulation engine for a BLE mesh chat
//! network: mobile agents carrying radio devices that discover each other,
//! form short-range links whose quality depends on distance and intervening
//! obstacles, and run a store-and-forward gossip protocol carrying
//! announcements and chat messages across multiple hops.
//!
//! ## Module map
//!
//! - [`codec`]: wire packet framing (v1/v2) and the TLV payload format.
//! - [`geometry`]: point-in-polygon, segment intersection, polygon
//!   inflation, lat/lon ↔ local-meter projection.
//! - [`environment`]: building polygons, containment/path queries, sliding
//!   collision resolution.
//! - [`pathfinder`]: visibility-graph construction and A* queries.
//! - [`spatial_index`]: uniform-grid neighbor lookup.
//! - [`link`]: per-link RSSI model and latency queue.
//! - [`device`]: identity, power mode, scan scheduling, connection limits.
//! - [`mesh`]: announce scheduling, packet ingress, peer table, mesh graph.
//! - [`agent`]: locomotion modes and stuck-recovery state machine.
//! - [`engine`]: the driver that steps everything in a fixed order per tick.
//! - [`event_bus`]: synchronous topic → subscriber broadcast.
//! - [`log_manager`]: ring buffer of structured log entries.
//! - [`config`]: simulator-level configuration (RNG seed, tick defaults).
//!
//! Rendering, user input, and map-data fetching are external collaborators
//! and are not part of this crate; the core consumes a polygonal
//! environment and emits timestamped events for a driver layer to consume.

pub mod agent;
pub mod codec;
pub mod config;
pub mod device;
pub mod engine;
pub mod environment;
pub mod event_bus;
pub mod geometry;
pub mod link;
pub mod log_manager;
pub mod mesh;
pub mod pathfinder;
pub mod spatial_index;
