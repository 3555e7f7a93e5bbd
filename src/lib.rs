//! Power balancing for hierarchical grid networks.
//!
//! A grid is a parent node feeding a set of child nodes. Balancing splits the
//! grid's capacity across the children and then moves surplus from
//! over-supplied nodes to under-supplied ones, charging a distance-based line
//! loss on every transfer.

pub mod api;
pub mod balancer;
pub mod config;
pub mod controller;
pub mod domain;
pub mod repo;
pub mod telemetry;
