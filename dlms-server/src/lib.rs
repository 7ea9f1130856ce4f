//! DLMS/COSEM server implementation
//!
//! This crate provides the gateway role: meters dial in over TCP, the
//! gateway answers their link and association requests, identifies them,
//! forwards their readings and routes backend commands to them.
//!
//! # TODO
//!
//! ## 服务器基础
//! - [x] 服务器配置管理
//! - [x] 连接监听和接受
//! - [x] 多电表连接管理（注册表）
//! - [x] 空闲超时断开
//!
//! ## 请求处理
//! - [x] SNRM/UA、AARQ/AARE、RLRQ/RLRE、DISC/UA
//! - [x] 电表身份识别（表号 / IP 地址）
//! - [x] 电表主动 GET 请求（返回 object-unavailable）
//! - [x] 命令下发与响应转发
//! - [ ] 电表事件推送（Data-Notification）

pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod listener;
pub mod registry;

pub use collaborators::{
    ChannelTelemetrySink, LogTelemetrySink, MeterDirectory, MeterId, StaticMeterDirectory, Telemetry,
    TelemetrySink,
};
pub use config::ServerConfig;
pub use dispatcher::InboundDispatcher;
pub use listener::ServerListener;
pub use registry::{CommandRequest, ConnectionHandle, ConnectionRegistry};
