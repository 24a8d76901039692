//! Exit codes for the CLI

#![allow(dead_code)]

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration or project error
pub const CONFIG_ERROR: i32 = 2;

/// Task graph error (cycle, unknown script)
pub const GRAPH_ERROR: i32 = 3;

/// User cancelled
pub const CANCELLED: i32 = 130;
