//! DLMS/COSEM meter communication engine
//!
//! Reads and controls electricity meters over TCP, either by dialing them
//! (client role) or by accepting meters that dial in (gateway role).
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dlms-core`: OBIS codes, typed values, error handling
//! - `dlms-asn1`: A-XDR encoding/decoding of typed values
//! - `dlms-transport`: TCP connector and framed byte streams
//! - `dlms-session`: HDLC frames, check sequence, stream reassembly
//! - `dlms-application`: APDUs, association state machine, meter commands
//! - `dlms-client`: Client role, request correlation, meter pool
//! - `dlms-server`: Gateway role, meter identification, connection registry
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - 核心数据类型（DataObject, Reading, CosemDateTime）
//! - A-XDR 编码/解码
//! - HDLC 帧、FCS、流重组
//! - AARQ/AARE、RLRQ/RLRE、GET/SET/ACTION (Normal)
//! - 客户端：关联、读写、继电器、充值、时钟、负荷曲线
//! - 网关：电表接入、身份识别、命令路由、数据转发
//!
//! ## 📋 待实现
//! - 分块传输（GET with data block）
//! - 加密（HLS GMAC）
//!
//! # Usage
//!
//! ```no_run
//! use dlms::client::{ClientConfig, DlmsClient};
//!
//! # async fn run() -> dlms::DlmsResult<()> {
//! let client = DlmsClient::connect(ClientConfig::new("10.0.0.5", 4059)).await?;
//! client.associate().await?;
//! let voltage = client.read_obis("1-0:32.7.0.255", 3, 2).await?;
//! println!("L1 voltage: {}", voltage);
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use dlms_core::datatypes::*;
pub use dlms_core::{DlmsError, DlmsResult, ObisCode};

// Re-export protocol layers
pub mod codec {
    pub use dlms_asn1::*;
}

pub mod hdlc {
    pub use dlms_session::*;
}

pub mod application {
    pub use dlms_application::*;
}

pub mod transport {
    pub use dlms_transport::*;
}

// Re-export client API
pub mod client {
    pub use dlms_client::*;
}

// Re-export server API
pub mod server {
    pub use dlms_server::*;
}
