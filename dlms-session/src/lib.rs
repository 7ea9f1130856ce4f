//! Session layer module for DLMS/COSEM protocol
//!
//! This crate provides the HDLC framing used between the backend and meters.
//!
//! # TODO
//!
//! ## HDLC 会话层
//! - [x] HDLC 帧编码/解码（单字节地址）
//! - [x] FCS / HCS 计算和验证（CRC-16/X-25）
//! - [x] SNRM/UA 链路参数协商
//! - [x] 流式重组（垃圾字节跳过、损坏帧丢弃、重新同步）
//! - [x] LLC Header 容错
//! - [ ] 多字节 HDLC 地址
//! - [ ] 帧分段和重组（S 位）

pub mod hdlc;

pub use hdlc::*;
