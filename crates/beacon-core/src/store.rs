//! 协调存储适配契约。
//!
//! # 设计背景（Why）
//! - 核心只依赖协调存储的一个窄切面：临时节点的增删改查与子目录监视；
//!   将其收敛为对象安全的 Trait，注册与镜像两侧即可在真实 ensemble 与
//!   进程内实现之间自由切换；
//! - 监视流以 [`ChildEvent::FullSync`] 承载全量重放：订阅建立与会话重连后
//!   均重投完整子集，镜像据此做差分，避免乱序补偿逻辑扩散到消费端。
//!
//! # 契约说明（What）
//! - 本 Trait 是整个工作区中唯一允许在存储 I/O 上挂起的部件；
//! - 所有方法的错误均为 [`StoreError`]，错误码在 `store.*` 命名空间内备案；
//! - `watch_children` 返回无限流；流的终止仅发生在客户端关闭之后。

use crate::error::{CoreError, codes};
use crate::path::DiscoveryPath;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// 子目录监视流的对象安全别名。
pub type ChildEventStream = BoxStream<'static, ChildEvent>;

/// 全量重放中的单个子节点记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildRecord {
    pub name: String,
    pub payload: Vec<u8>,
}

/// 子目录监视事件。
///
/// # 契约说明（What）
/// - `FullSync`：订阅建立时与会话重连后投递，携带当前完整子集；
///   消费端应与本地状态做差分，推导出隐含的增删；
/// - `Added` / `Updated`：节点新增或载荷更新；对镜像而言二者语义合并
///   （键缺失时 `Updated` 按 `Added` 处理）；
/// - `Removed`：节点删除（显式删除或随会话过期消失）。
#[derive(Clone, Debug)]
pub enum ChildEvent {
    FullSync(Vec<ChildRecord>),
    Added { name: String, payload: Vec<u8> },
    Updated { name: String, payload: Vec<u8> },
    Removed { name: String },
}

/// 协调存储故障的细粒度原因。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// 目标节点已存在（创建语义冲突）。
    #[error("node already exists at `{path}`")]
    NodeExists { path: String },
    /// 目标节点不存在。
    #[error("no node at `{path}`")]
    NoNode { path: String },
    /// 会话失效；该会话持有的全部临时节点已经或即将消失。
    #[error("coordination session lost")]
    SessionLost,
    /// 可重试的瞬时故障（超时、断连）。
    #[error("transient store failure: {detail}")]
    Transient { detail: String },
    /// 客户端已关闭，后续调用不再可用。
    #[error("coordination client is closed")]
    Closed,
}

impl StoreError {
    /// 映射到稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NodeExists { .. } => codes::STORE_NODE_EXISTS,
            StoreError::NoNode { .. } => codes::STORE_NO_NODE,
            StoreError::SessionLost => codes::STORE_SESSION_LOST,
            StoreError::Transient { .. } => codes::STORE_TRANSIENT,
            StoreError::Closed => codes::STORE_CLOSED,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::new(err.code(), err.to_string()).with_cause(err)
    }
}

/// 协调存储客户端需要满足的窄契约。
///
/// # 逻辑解析（How）
/// - `ensure_path`：幂等地创建内部（持久）节点链；
/// - `create_ephemeral`：创建绑定当前会话的临时节点，会话结束自动删除；
/// - `set_data`：对单节点的原子整体写；
/// - `delete`：尽力删除；目标缺失由调用方按场景决定是否容忍；
/// - `get_data`：点读；
/// - `watch_children`：注册子目录监视并立即投递 `FullSync`；
/// - `close`：释放客户端，进入终态；其后所有操作返回 [`StoreError::Closed`]
///   或 [`StoreError::SessionLost`]。
///
/// # 并发语义
/// - 实现必须 `Send + Sync`，单节点写具备原子性（不会暴露半写载荷）；
/// - 监视流各自独立，慢消费者不得阻塞写路径。
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    async fn ensure_path(&self, path: &DiscoveryPath) -> Result<(), StoreError>;

    async fn create_ephemeral(
        &self,
        path: &DiscoveryPath,
        payload: Vec<u8>,
    ) -> Result<(), StoreError>;

    async fn set_data(&self, path: &DiscoveryPath, payload: Vec<u8>) -> Result<(), StoreError>;

    async fn delete(&self, path: &DiscoveryPath) -> Result<(), StoreError>;

    async fn get_data(&self, path: &DiscoveryPath) -> Result<Vec<u8>, StoreError>;

    fn watch_children(&self, path: &DiscoveryPath) -> ChildEventStream;

    async fn close(&self) -> Result<(), StoreError>;
}
