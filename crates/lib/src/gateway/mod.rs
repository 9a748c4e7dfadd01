//! Gateway: HTTP + WebSocket surface for the widget's presentation layer.
//!
//! Single port serves HTTP and WebSocket. Protocol: first frame must be `connect`;
//! then requests (req/res) and conversation events. Each connection is one widget session.

mod protocol;
mod server;

pub use protocol::{
    ActivateParams, ConnectParams, FeedbackParams, HelloOk, SnapshotParams, SubmitParams, WsEvent,
    WsRequest, WsResponse,
};
pub use server::{run_gateway, serve, GatewayState};
