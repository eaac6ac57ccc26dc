#![deny(unsafe_code)]
#![doc = "beacon-store-memory: 协调存储契约的进程内参考实现。"]
#![doc = ""]
#![doc = "提供共享的 `MemoryEnsemble`（节点树 + 会话 + 监视器扇出）与挂载其上的"]
#![doc = "`MemoryCoordinationClient`。语义对齐真实 ensemble 的关键行为：临时节点"]
#![doc = "随会话消失、订阅与重连时投递全量重放、客户端关闭为终态。"]
#![doc = "定位与契约测试桩一致：供集成测试与本地开发使用，不追求持久化。"]

mod client;
mod ensemble;

pub use client::{ClientStatus, MemoryCoordinationClient};
pub use ensemble::{MemoryEnsemble, SessionId};
