//! Route storage for the edge router.
//!
//! The table is assembled from configuration at startup and never changes
//! afterwards.

mod route_table;

pub use route_table::{Route, RouteTable, RouteTableBuilder, UpstreamTarget};
