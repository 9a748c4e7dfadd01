//! Agentchat core library: agent registry, reply normalization, per-agent conversations,
//! the dialogue controller, the backend transport and the widget gateway.
//! Shared by the CLI and any embedding presentation layer.

pub mod agents;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod gateway;
pub mod normalize;
pub mod transport;
