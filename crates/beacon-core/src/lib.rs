#![deny(unsafe_code)]
#![doc = "beacon-core: 服务发现与加权负载均衡平面的核心契约。"]
#![doc = ""]
#![doc = "本 crate 收敛四类稳定契约：宿主记录及其自描述编解码（`host`）、"]
#![doc = "发现路径命名（`path`）、协调存储适配切面（`store`）与统一错误域（`error`）。"]
#![doc = "注册端（beacon-server）与消费端（beacon-balancer）只通过这些契约协作，"]
#![doc = "不感知彼此的实现细节。"]

pub use async_trait::async_trait;

pub mod error;
pub mod host;
pub mod path;
pub mod store;

pub use error::{CoreError, Result, codes};
pub use host::{CURRENT_VERSION, DecodeError, Host, HostKey, HostMetadata};
pub use path::DiscoveryPath;
pub use store::{ChildEvent, ChildEventStream, ChildRecord, CoordinationStore, StoreError};
