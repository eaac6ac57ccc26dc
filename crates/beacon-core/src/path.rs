//! 发现路径：协调存储中的层级命名。

use crate::error::{CoreError, codes};
use crate::host::Host;
use std::fmt;

/// 协调存储内的绝对路径，注册目录与宿主节点共用同一形态。
///
/// # 契约说明（What）
/// - 必须以 `/` 开头，不得以 `/` 结尾，段不得为空（例如 `/grpc/local_dev`）；
/// - [`DiscoveryPath::child`] 拼接子节点路径；[`DiscoveryPath::host_node`]
///   生成宿主专属的 `"<address>:<port>"` 子节点；
/// - [`DiscoveryPath::ancestors`] 自顶向下给出全部前缀，供 `ensure_path`
///   逐级创建内部节点。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscoveryPath(String);

impl DiscoveryPath {
    /// 校验并构造路径；违反命名约定时返回 `path.invalid`。
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let valid = raw.starts_with('/')
            && !raw.ends_with('/')
            && raw[1..].split('/').all(|segment| !segment.is_empty());
        if !valid {
            return Err(CoreError::new(
                codes::PATH_INVALID,
                format!("`{raw}` is not an absolute, slash-delimited path"),
            ));
        }
        Ok(Self(raw))
    }

    /// 以字符串视图读取路径。
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 拼接一个子节点。`name` 沿用与段相同的约束（非空、不含 `/`）。
    pub fn child(&self, name: &str) -> Result<Self, CoreError> {
        if name.is_empty() || name.contains('/') {
            return Err(CoreError::new(
                codes::PATH_INVALID,
                format!("`{name}` is not a valid child node name"),
            ));
        }
        Ok(Self(format!("{}/{}", self.0, name)))
    }

    /// 该宿主在本目录下拥有的临时节点路径。
    pub fn host_node(&self, host: &Host) -> Self {
        // node_name 由地址与端口拼接而成，不会引入空段。
        Self(format!("{}/{}", self.0, host.node_name()))
    }

    /// 自顶向下的全部前缀路径，含自身。
    pub fn ancestors(&self) -> impl Iterator<Item = DiscoveryPath> + '_ {
        self.0
            .match_indices('/')
            .skip(1)
            .map(|(idx, _)| DiscoveryPath(self.0[..idx].to_string()))
            .chain(std::iter::once(self.clone()))
    }

    /// 返回父路径；单段路径无父目录。
    pub fn parent(&self) -> Option<Self> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some(Self(self.0[..idx].to_string()))
    }

    /// 路径的末段，即节点名。
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DiscoveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
