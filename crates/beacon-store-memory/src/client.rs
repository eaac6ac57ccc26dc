//! 挂载在共享 ensemble 上的协调存储客户端。

use crate::ensemble::{MemoryEnsemble, SessionId};
use beacon_core::store::{ChildEventStream, CoordinationStore, StoreError};
use beacon_core::{DiscoveryPath, async_trait};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// 客户端运行状态；`Stopped` 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientStatus {
    Running,
    Stopped,
}

/// [`CoordinationStore`] 的进程内实现。
///
/// # 会话语义（What）
/// - 每个客户端持有一个 ensemble 会话；通过它创建的临时节点绑定该会话；
/// - 会话被 [`MemoryEnsemble::expire_session`] 注入失效后，客户端的下一次
///   操作返回 [`StoreError::SessionLost`] 并自动轮换到新会话，此后的操作在
///   新会话下继续（对应真实客户端库的自动重连）；调用方据此触发重注册；
/// - [`CoordinationStore::close`] 结束当前会话并进入终态 [`ClientStatus::Stopped`]，
///   该客户端注册的监视流随之终止。
pub struct MemoryCoordinationClient {
    ensemble: Arc<MemoryEnsemble>,
    client_id: u64,
    session: AtomicU64,
    closed: AtomicBool,
}

impl MemoryCoordinationClient {
    /// 在共享 ensemble 上开启一个新客户端（含新会话）。
    pub fn connect(ensemble: Arc<MemoryEnsemble>) -> Arc<Self> {
        let client_id = ensemble.allocate_id();
        let session = ensemble.open_session();
        Arc::new(Self {
            ensemble,
            client_id,
            session: AtomicU64::new(session),
            closed: AtomicBool::new(false),
        })
    }

    /// 当前运行状态。
    pub fn status(&self) -> ClientStatus {
        if self.closed.load(Ordering::SeqCst) {
            ClientStatus::Stopped
        } else {
            ClientStatus::Running
        }
    }

    /// 当前会话标识；测试用于配合 [`MemoryEnsemble::expire_session`]。
    pub fn session_id(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    /// 校验客户端与会话状态。
    ///
    /// 会话失效的第一次观测返回 `SessionLost`，同时轮换出新会话；
    /// 这一次失败正是上层重注册的信号。
    fn guard(&self) -> Result<SessionId, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let session = self.session.load(Ordering::SeqCst);
        if self.ensemble.session_alive(session) {
            return Ok(session);
        }
        let fresh = self.ensemble.open_session();
        self.session.store(fresh, Ordering::SeqCst);
        debug!(
            target: "beacon_store_memory",
            expired = session,
            fresh,
            "session rotated after expiry"
        );
        Err(StoreError::SessionLost)
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationClient {
    async fn ensure_path(&self, path: &DiscoveryPath) -> Result<(), StoreError> {
        self.guard()?;
        for ancestor in path.ancestors() {
            self.ensemble.ensure_node(ancestor.as_str());
        }
        Ok(())
    }

    async fn create_ephemeral(
        &self,
        path: &DiscoveryPath,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        let session = self.guard()?;
        if self.ensemble.create_ephemeral(path.as_str(), payload, session) {
            Ok(())
        } else {
            Err(StoreError::NodeExists {
                path: path.as_str().to_string(),
            })
        }
    }

    async fn set_data(&self, path: &DiscoveryPath, payload: Vec<u8>) -> Result<(), StoreError> {
        self.guard()?;
        if self.ensemble.set_data(path.as_str(), payload) {
            Ok(())
        } else {
            Err(StoreError::NoNode {
                path: path.as_str().to_string(),
            })
        }
    }

    async fn delete(&self, path: &DiscoveryPath) -> Result<(), StoreError> {
        self.guard()?;
        if self.ensemble.delete(path.as_str()) {
            Ok(())
        } else {
            Err(StoreError::NoNode {
                path: path.as_str().to_string(),
            })
        }
    }

    async fn get_data(&self, path: &DiscoveryPath) -> Result<Vec<u8>, StoreError> {
        self.guard()?;
        match self.ensemble.node(path.as_str()) {
            Some(record) => Ok(record.payload),
            None => Err(StoreError::NoNode {
                path: path.as_str().to_string(),
            }),
        }
    }

    fn watch_children(&self, path: &DiscoveryPath) -> ChildEventStream {
        let rx = self.ensemble.watch(path.as_str(), self.client_id);
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let session = self.session.load(Ordering::SeqCst);
        self.ensemble.expire_session(session);
        self.ensemble.drop_watchers_of(self.client_id);
        Ok(())
    }
}
