//! DLMS/COSEM client implementation
//!
//! This crate provides the client role: dialing meters over TCP, setting up
//! the HDLC link and association, and reading, writing and invoking methods.
//!
//! # TODO
//!
//! ## 连接管理
//! - [x] TCP 连接（连接超时）
//! - [x] SNRM/UA 与 AARQ/AARE 握手
//! - [x] RLRQ/RLRE 释放与 DISC 断开
//! - [x] 连接池（按表号复用，并发上限）
//! - [ ] 自动重连机制
//!
//! ## 客户端功能
//! - [x] GET / SET / ACTION
//! - [x] 批量读取、负荷曲线、时钟读写
//! - [x] 继电器控制、充值令牌
//! - [x] 请求/响应超时处理
//! - [x] invoke-id 匹配（严格 / 按顺序）
//! - [ ] GET-with-list / 分块传输

pub mod client;
pub mod config;
pub mod correlator;
pub mod pool;

pub use client::{DlmsClient, ObisRead};
pub use config::ClientConfig;
pub use correlator::{MatchStrategy, PendingResponse, RequestCorrelator};
pub use pool::{BulkReadResult, MeterPool, MeterTarget, DEFAULT_MAX_CONCURRENT};
