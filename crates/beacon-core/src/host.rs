//! 宿主记录及其自描述编解码。
//!
//! 注册目录下每个临时节点的载荷即本模块 [`Host`] 的编码结果；编码采用紧凑 JSON，
//! 携带 `version` 标签以支撑增量模式演进。

use crate::error::{CoreError, codes};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 当前写入端的记录模式版本。
pub const CURRENT_VERSION: i32 = 0;

/// 宿主的可变元数据：负载标量与隔离标记。
///
/// # 契约说明（What）
/// - `load`：有符号 32 位整数，约定非负，数值越低代表越空闲；
/// - `quarantined`：置位后该宿主不应再接收新的 RPC；
/// - 结构化相等：元数据参与 `==` 比较（与 [`Host`] 的键相等语义不同）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetadata {
    pub load: i32,
    pub quarantined: bool,
}

/// 成员资格的最小单元：一台已注册服务器的身份与元数据。
///
/// # 设计背景（Why）
/// - 注册目录中每个子节点对应一台服务器，节点名与载荷内的 `(address, port)`
///   必须一致；
/// - 相等与哈希仅基于 `(address, port)`：`version` 与元数据是可变部分，
///   不参与成员身份判定。
///
/// # 契约说明（What）
/// - `version`：单调递增的模式标签，当前为 0；读取端拒绝更高版本；
/// - `address`：DNS 名或 IP 字面量；`port`：16 位无符号端口；
/// - **后置条件**：`decode(encode(h))` 与 `h` 键相等且元数据逐字段相等。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Host {
    pub version: i32,
    pub address: String,
    pub port: u16,
    pub metadata: HostMetadata,
}

impl Host {
    /// 以当前模式版本构造宿主记录。
    pub fn new(address: impl Into<String>, port: u16, metadata: HostMetadata) -> Self {
        Self {
            version: CURRENT_VERSION,
            address: address.into(),
            port,
            metadata,
        }
    }

    /// 返回按 `(address, port)` 取键的身份视图。
    pub fn key(&self) -> HostKey {
        HostKey {
            address: self.address.clone(),
            port: self.port,
        }
    }

    /// 注册目录下该宿主拥有的子节点名，形如 `"<address>:<port>"`。
    pub fn node_name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// 序列化为存储节点载荷。
    ///
    /// 对任意合法宿主记录本操作语义上总是成功；`serde_json` 的失败分支仅在
    /// 自定义 `Serialize` 报错时可达，此处仍按稳定错误码传播而非 panic。
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self)
            .map_err(|err| CoreError::new(codes::CODEC_ENCODE, "host record unserializable").with_cause(err))
    }

    /// 从存储节点载荷反序列化。
    ///
    /// - 未知字段被容忍，保证增量模式变更下旧读取端仍可解析；
    /// - `version` 高于 [`CURRENT_VERSION`] 时返回
    ///   [`DecodeError::UnsupportedVersion`]，调用方可据此触发升级告警。
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let host: Host = serde_json::from_slice(bytes).map_err(|err| DecodeError::Malformed {
            detail: err.to_string(),
        })?;
        if host.version > CURRENT_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                version: host.version,
                supported: CURRENT_VERSION,
            });
        }
        Ok(host)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// `(address, port)` 身份键，供镜像与选路器按序索引。
///
/// 派生 `Ord`，使快照在 `BTreeMap` 中保持确定性迭代顺序，轮转平局时
/// 各读取端观察到一致的候选排列。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostKey {
    pub address: String,
    pub port: u16,
}

impl HostKey {
    /// 从子节点名 `"<address>:<port>"` 解析身份键。
    ///
    /// 端口取最后一个冒号之后的部分，因此 IPv6 字面量（如 `::1:9000`）
    /// 同样可解析。不合法的名字返回 `None`，调用方按无效事件丢弃。
    pub fn parse(node_name: &str) -> Option<Self> {
        let (address, port) = node_name.rsplit_once(':')?;
        if address.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some(Self {
            address: address.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// 宿主记录解码失败的细粒度原因。
///
/// 镜像侧按事件粒度丢弃并记录；点读调用处转换为 [`CoreError`] 向上传播。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 字节不是合法的记录编码（含截断）。
    #[error("host record bytes are malformed: {detail}")]
    Malformed { detail: String },
    /// 记录版本高于读取端支持范围。
    #[error("host record version {version} exceeds supported {supported}")]
    UnsupportedVersion { version: i32, supported: i32 },
}

impl From<DecodeError> for CoreError {
    fn from(err: DecodeError) -> Self {
        let code = match &err {
            DecodeError::Malformed { .. } => codes::CODEC_DECODE,
            DecodeError::UnsupportedVersion { .. } => codes::CODEC_UNSUPPORTED_VERSION,
        };
        CoreError::new(code, err.to_string()).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip_preserves_identity_and_metadata() {
        let host = Host::new(
            "cache-3.internal",
            7020,
            HostMetadata {
                load: 42,
                quarantined: true,
            },
        );
        let bytes = host.encode().expect("encode");
        let decoded = Host::decode(&bytes).expect("decode");
        assert_eq!(decoded, host);
        assert_eq!(decoded.metadata, host.metadata);
        assert_eq!(decoded.version, CURRENT_VERSION);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let bytes = br#"{"version":0,"address":"a","port":1,"metadata":{"load":0,"quarantined":false},"zone":"eu-1"}"#;
        let decoded = Host::decode(bytes).expect("additive schema change must parse");
        assert_eq!(decoded.node_name(), "a:1");
    }

    #[test]
    fn newer_version_is_rejected() {
        let bytes = br#"{"version":7,"address":"a","port":1,"metadata":{"load":0,"quarantined":false}}"#;
        match Host::decode(bytes) {
            Err(DecodeError::UnsupportedVersion { version, supported }) => {
                assert_eq!(version, 7);
                assert_eq!(supported, CURRENT_VERSION);
            }
            other => panic!("期望版本拒绝，实际 {other:?}"),
        }
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut bytes = Host::new("a", 1, HostMetadata::default())
            .encode()
            .expect("encode");
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            Host::decode(&bytes),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn key_parse_handles_ipv6_literals() {
        let key = HostKey::parse("::1:9000").expect("ipv6 node name");
        assert_eq!(key.address, "::1");
        assert_eq!(key.port, 9000);
        assert!(HostKey::parse("no-port").is_none());
        assert!(HostKey::parse(":17").is_none());
    }

    proptest! {
        #[test]
        fn codec_roundtrip_holds_for_all_hosts(
            address in "[a-z][a-z0-9.-]{0,30}",
            port in proptest::num::u16::ANY,
            load in proptest::num::i32::ANY,
            quarantined in proptest::bool::ANY,
        ) {
            let host = Host::new(address, port, HostMetadata { load, quarantined });
            let decoded = Host::decode(&host.encode().unwrap()).unwrap();
            prop_assert_eq!(&decoded, &host);
            prop_assert_eq!(decoded.metadata, host.metadata);
        }
    }
}
