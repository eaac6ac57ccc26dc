//! 稳定错误域：`CoreError` 与错误码注册表。
//!
//! # 设计背景（Why）
//! - 注册、发布、镜像、选路各层产生的故障需要合流为统一的错误码，便于日志、
//!   指标与告警系统执行精确分类；
//! - 错误码采用 `<领域>.<语义>` 的稳定字符串约定，调用方不应解析 message 推断语义。
//!
//! # 契约说明（What）
//! - [`codes`] 列出本工作区全部备案错误码；新增错误码必须在此登记；
//! - [`CoreError`] 以 Builder 风格叠加底层原因，并通过 `source()` 暴露完整链路。

use std::borrow::Cow;
use std::fmt;

/// 本工作区统一的 `Result` 别名，错误默认收敛到 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 已备案的稳定错误码集合。
pub mod codes {
    /// 宿主记录序列化失败。
    pub const CODEC_ENCODE: &str = "codec.encode";
    /// 宿主记录字节不合法或被截断。
    pub const CODEC_DECODE: &str = "codec.decode";
    /// 宿主记录版本高于读取端支持上限。
    pub const CODEC_UNSUPPORTED_VERSION: &str = "codec.unsupported_version";
    /// 发现路径不符合层级命名约定。
    pub const PATH_INVALID: &str = "path.invalid";
    /// 协调存储目标节点已存在。
    pub const STORE_NODE_EXISTS: &str = "store.node_exists";
    /// 协调存储目标节点不存在。
    pub const STORE_NO_NODE: &str = "store.no_node";
    /// 协调存储会话已失效，临时节点随之消失。
    pub const STORE_SESSION_LOST: &str = "store.session_lost";
    /// 协调存储出现可重试的瞬时故障。
    pub const STORE_TRANSIENT: &str = "store.transient";
    /// 协调存储客户端已关闭。
    pub const STORE_CLOSED: &str = "store.closed";
    /// RPC 传输层 I/O 失败。
    pub const RPC_IO: &str = "rpc.io";
    /// RPC 帧超出消息大小预算。
    pub const RPC_FRAME_OVERSIZE: &str = "rpc.frame_oversize";
    /// RPC 目标服务未注册。
    pub const RPC_UNKNOWN_SERVICE: &str = "rpc.unknown_service";
    /// RPC 连接或监听器已关闭。
    pub const RPC_CLOSED: &str = "rpc.closed";
    /// 对端服务返回的应用层失败。
    pub const RPC_REMOTE: &str = "rpc.remote";
    /// 快照中不存在可用（未隔离）的端点。
    pub const BALANCER_NO_READY_ENDPOINT: &str = "balancer.no_ready_endpoint";
    /// 注册冲突：清理陈旧节点后创建仍然失败。
    pub const REGISTRY_CONFLICT: &str = "registry.conflict";
    /// 服务器设置不满足启动前置条件。
    pub const SERVER_INVALID_SETTINGS: &str = "server.invalid_settings";
}

/// 跨 crate 共享的稳定错误类型。
///
/// # 设计背景（Why）
/// - 对外暴露的 API 需要一个 `Send + Sync + 'static` 的错误载体，承载稳定错误码、
///   排障描述与可选的底层原因；
/// - 细粒度枚举（如 [`crate::store::StoreError`]）在各自边界内保留精确匹配能力，
///   越过边界后统一转换为本类型。
///
/// # 契约说明（What）
/// - `code`：`'static` 字符串，必须取自 [`codes`]；
/// - `message`：面向排障人员的自然语言描述，不包含敏感信息；
/// - `cause`：可选底层原因，经由 [`std::error::Error::source`] 暴露。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoreError {
    /// 构造核心错误。`code` 必须取自 [`codes`]，`message` 可为静态或堆分配字符串。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_code_message_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline elapsed");
        let err = CoreError::new(codes::STORE_TRANSIENT, "set_data timed out").with_cause(io);
        assert_eq!(err.code(), codes::STORE_TRANSIENT);
        assert_eq!(err.to_string(), "[store.transient] set_data timed out");
        assert!(err.cause().is_some());
    }
}
