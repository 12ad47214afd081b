//! Four-wheel vehicle simulation: script-driven vehicle physics, driver
//! controls and engine audio, hosted by a websocket game server.

pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod script;
pub mod sim;
pub mod spawn;
pub mod state;
pub mod vehicle;
