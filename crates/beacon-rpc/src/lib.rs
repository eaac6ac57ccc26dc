#![deny(unsafe_code)]
#![doc = "beacon-rpc: 长度前缀帧上的最小双向 RPC 传输。"]
#![doc = ""]
#![doc = "为注册端与调用端提供同一套线上格式：`u32` 长度前缀帧、按名派发的请求、"]
#![doc = "带状态位的响应，两侧统一执行消息大小预算（默认 4 MiB）。"]
#![doc = "监听器以信号量约束并发连接任务，停机信号只在帧间隙生效，"]
#![doc = "在途请求总能完成后退出。TLS 终结不在本 crate 范围内，"]
#![doc = "证书材料由上层设置原样传递给支持它的传输实现。"]

mod client;
mod frame;
mod listener;
mod service;

/// TLS 证书材料；本工作区不终结 TLS，原样传递给支持它的传输实现。
#[derive(Clone)]
pub struct TlsMaterial {
    pub cert_chain_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub trust_anchors_pem: Vec<u8>,
}

pub use client::RpcClient;
pub use frame::DEFAULT_MAX_MESSAGE_SIZE;
pub use listener::{ListenerConfig, RpcListener, RpcServerHandle};
pub use service::{RpcService, ServiceRegistry};
