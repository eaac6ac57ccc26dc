//! 宿主节点：注册目录下本服务器拥有的那一个临时节点。

use crate::load::QuarantineFlag;
use beacon_core::store::{CoordinationStore, StoreError};
use beacon_core::{CoreError, DiscoveryPath, Host, HostMetadata, codes};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

/// 本服务器在协调存储中的身份与写入通道。
///
/// # 设计背景（Why）
/// - 发布器、隔离控制器与生命周期监督器都要写同一个节点；把宿主身份、
///   节点路径、存储句柄与最近发布负载收敛到一个共享结构，三者持有
///   值拷贝与 `Arc`，服务器与任务之间不形成环引用；
/// - `published_load` 记录最近一次成功写入的负载：隔离期间的标记写
///   与重注册都以它保持 `load` 字段不回跳。
pub(crate) struct HostNode {
    address: String,
    port: u16,
    directory: DiscoveryPath,
    node_path: DiscoveryPath,
    store: Arc<dyn CoordinationStore>,
    flag: QuarantineFlag,
    published_load: AtomicI32,
}

impl HostNode {
    pub(crate) fn new(
        address: String,
        port: u16,
        directory: DiscoveryPath,
        store: Arc<dyn CoordinationStore>,
        flag: QuarantineFlag,
    ) -> Arc<Self> {
        let node_path = directory.host_node(&Host::new(address.clone(), port, HostMetadata::default()));
        Arc::new(Self {
            address,
            port,
            directory,
            node_path,
            store,
            flag,
            published_load: AtomicI32::new(0),
        })
    }

    pub(crate) fn identity(&self) -> Host {
        Host::new(
            self.address.clone(),
            self.port,
            HostMetadata {
                load: self.published_load.load(Ordering::SeqCst),
                quarantined: self.flag.get(),
            },
        )
    }

    pub(crate) fn node_path(&self) -> &DiscoveryPath {
        &self.node_path
    }

    pub(crate) fn flag(&self) -> &QuarantineFlag {
        &self.flag
    }

    pub(crate) fn last_published_load(&self) -> i32 {
        self.published_load.load(Ordering::SeqCst)
    }

    pub(crate) fn record_published_load(&self, load: i32) {
        self.published_load.store(load, Ordering::SeqCst);
    }

    /// 建立（或重建）注册：内部节点链、陈旧节点清理、临时节点创建。
    ///
    /// # 契约说明（What）
    /// - 陈旧节点删除是尽力而为，`NoNode` 按正常情况吞掉；
    /// - 清理后创建仍然报 `NodeExists` 说明同键节点由其它活跃会话持有，
    ///   映射为 `registry.conflict`，启动因此失败；
    /// - 载荷携带最近发布负载与当前隔离标记，重注册不回退元数据。
    pub(crate) async fn register(&self) -> Result<(), CoreError> {
        self.store.ensure_path(&self.directory).await.map_err(CoreError::from)?;
        match self.store.delete(&self.node_path).await {
            Ok(()) => {
                debug!(
                    target: "beacon_server::registration",
                    node = %self.node_path,
                    "stale registration removed"
                );
            }
            Err(StoreError::NoNode { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        let payload = self.identity().encode()?;
        match self.store.create_ephemeral(&self.node_path, payload).await {
            Ok(()) => Ok(()),
            Err(StoreError::NodeExists { path }) => Err(CoreError::new(
                codes::REGISTRY_CONFLICT,
                format!("live registration already present at `{path}`"),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// 写入一次元数据；调用方决定如何处置失败。
    pub(crate) async fn write_metadata(
        &self,
        load: i32,
        quarantined: bool,
    ) -> Result<(), CoreError> {
        let host = Host::new(
            self.address.clone(),
            self.port,
            HostMetadata { load, quarantined },
        );
        let payload = host.encode()?;
        self.store
            .set_data(&self.node_path, payload)
            .await
            .map_err(CoreError::from)
    }
}

/// 隔离控制：原子翻转标记，再同步一次节点元数据。
///
/// 并发进出隔离在原子标记上串行，最后的写者同时赢得内存与存储中的状态。
pub(crate) async fn set_quarantined(node: &HostNode, value: bool) -> Result<(), CoreError> {
    node.flag().set(value);
    let load = node.last_published_load();
    match node.write_metadata(load, value).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(
                target: "beacon_server::registration",
                node = %node.node_path(),
                quarantined = value,
                error = %err,
                "quarantine flag write failed"
            );
            Err(err)
        }
    }
}
