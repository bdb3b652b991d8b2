//! navcache — multi-system navigation state cache.
//!
//! Menu trees and access allow-lists per system (persistent tier), open tab
//! sessions per system (volatile tier), and a namespaced two-tier key/value
//! layer with quota-driven eviction underneath both.

pub mod config;
pub mod menu;
pub mod nav;
pub mod route;
pub mod storage;
pub mod tabs;

pub use nav::{NavCache, RouteDecision};
