#![deny(unsafe_code)]
#![doc = "beacon-server: 注册、负载发布与隔离控制的服务器侧生命周期。"]
#![doc = ""]
#![doc = "启动流程：解析宿主身份（0 端口由监听器分配）、绑定 RPC 监听、"]
#![doc = "建立注册目录下的临时节点、装配负载发布器与生命周期监督器。"]
#![doc = "发布器把样本突发折叠为每窗口至多一次的节点写入并尊重隔离标记；"]
#![doc = "监督器在会话丢失后重建注册。停机为协作式：窗口内未发布的值丢弃，"]
#![doc = "在途 RPC 完成后监听器退出，临时节点随会话自动消失。"]

mod load;
mod publisher;
mod registration;
mod server;

pub use beacon_rpc::TlsMaterial;
pub use load::{LoadQueue, QuarantineFlag};
pub use publisher::DEFAULT_LOAD_UPDATE_INTERVAL;
pub use server::{Server, ServerSettings};
