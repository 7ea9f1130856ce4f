//! Data encoding for DLMS/COSEM
//!
//! This crate implements the A-XDR encoding of typed DLMS values: a one-byte
//! type tag followed by a fixed or length-prefixed payload.
//!
//! # TODO
//!
//! - [x] 基本数据类型编码/解码
//! - [x] 长度编码（短格式与 0x81/0x82 长格式）
//! - [x] 未知类型标签容错（Unknown 变体）
//! - [ ] CompactArray 解码

pub mod axdr;

pub use axdr::{AxdrDecoder, AxdrEncoder, AxdrTag};
pub use axdr::types::{decode_length, encode_length};
