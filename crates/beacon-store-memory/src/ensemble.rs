//! 进程内 ensemble：节点树、会话与监视器扇出。

use beacon_core::store::{ChildEvent, ChildRecord};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// 会话标识；临时节点与之绑定，会话结束节点消失。
pub type SessionId = u64;

#[derive(Clone, Debug)]
pub(crate) struct NodeRecord {
    pub payload: Vec<u8>,
    /// `Some(session)` 表示临时节点；`None` 为持久内部节点。
    pub owner: Option<SessionId>,
}

struct WatcherEntry {
    dir: String,
    client_id: u64,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

/// 协调存储的进程内实现核心。
///
/// # 设计背景（Why）
/// - 契约测试与本地开发需要一个语义完整、可注入故障的 ensemble：
///   临时节点随会话消失、监视器在订阅与重连时收到全量重放；
/// - 以 `DashMap` 按绝对路径持有节点树，监视器注册表单独加锁，
///   写路径只在扇出瞬间持有注册表锁，慢消费者不会阻塞写入
///   （事件通道无界）。
///
/// # 契约说明（What）
/// - 所有变更通过任意客户端进入后，按目录精确匹配扇出给监视器；
/// - [`MemoryEnsemble::expire_session`] 是测试钩子：使会话失效、删除其
///   临时节点并投递对应 `Removed` 事件；
/// - [`MemoryEnsemble::trigger_resync`] 模拟监视重建，向目录的全部
///   监视器重投 `FullSync`。
pub struct MemoryEnsemble {
    nodes: DashMap<String, NodeRecord>,
    sessions: DashMap<SessionId, ()>,
    watchers: Mutex<Vec<WatcherEntry>>,
    next_id: AtomicU64,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            sessions: DashMap::new(),
            watchers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 共享句柄，供多个客户端挂载同一 ensemble。
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn open_session(&self) -> SessionId {
        let session = self.allocate_id();
        self.sessions.insert(session, ());
        session
    }

    pub(crate) fn session_alive(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    /// 使会话失效：删除其全部临时节点并广播 `Removed`。
    ///
    /// 测试钩子，同时也是客户端关闭路径的实现基础。
    pub fn expire_session(&self, session: SessionId) {
        if self.sessions.remove(&session).is_none() {
            return;
        }
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().owner == Some(session))
            .map(|entry| entry.key().clone())
            .collect();
        for path in doomed {
            self.nodes.remove(&path);
            debug!(target: "beacon_store_memory", %path, session, "ephemeral removed with expired session");
            self.emit_removed(&path);
        }
    }

    /// 向目录的全部监视器重投当前子集，模拟会话重连后的监视重建。
    pub fn trigger_resync(&self, dir: &str) {
        let snapshot = self.children_of(dir);
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter().filter(|w| w.dir == dir) {
            let _ = watcher.tx.send(ChildEvent::FullSync(snapshot.clone()));
        }
    }

    pub(crate) fn node(&self, path: &str) -> Option<NodeRecord> {
        self.nodes.get(path).map(|entry| entry.value().clone())
    }

    /// 幂等创建持久节点；已有节点（无论持久或临时）保持原样。
    pub(crate) fn ensure_node(&self, path: &str) {
        self.nodes.entry(path.to_string()).or_insert(NodeRecord {
            payload: Vec::new(),
            owner: None,
        });
    }

    pub(crate) fn create_ephemeral(
        &self,
        path: &str,
        payload: Vec<u8>,
        session: SessionId,
    ) -> bool {
        let inserted = match self.nodes.entry(path.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(NodeRecord {
                    payload,
                    owner: Some(session),
                });
                true
            }
        };
        if inserted {
            self.emit_added(path);
        }
        inserted
    }

    pub(crate) fn set_data(&self, path: &str, payload: Vec<u8>) -> bool {
        let updated = match self.nodes.get_mut(path) {
            Some(mut entry) => {
                entry.value_mut().payload = payload;
                true
            }
            None => false,
        };
        if updated {
            self.emit_updated(path);
        }
        updated
    }

    pub(crate) fn delete(&self, path: &str) -> bool {
        let removed = self.nodes.remove(path).is_some();
        if removed {
            self.emit_removed(path);
        }
        removed
    }

    /// 注册监视器并立即投递 `FullSync`。
    ///
    /// 快照与注册在监视器锁内完成：并发写方的扇出同样要过这把锁，
    /// 因此注册瞬间不存在既不进快照、也不进增量的事件窗口。
    pub(crate) fn watch(
        &self,
        dir: &str,
        client_id: u64,
    ) -> mpsc::UnboundedReceiver<ChildEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watchers = self.watchers.lock();
        let _ = tx.send(ChildEvent::FullSync(self.children_of(dir)));
        watchers.push(WatcherEntry {
            dir: dir.to_string(),
            client_id,
            tx,
        });
        rx
    }

    /// 终止某客户端注册的全部监视流。
    pub(crate) fn drop_watchers_of(&self, client_id: u64) {
        self.watchers.lock().retain(|w| w.client_id != client_id);
    }

    fn children_of(&self, dir: &str) -> Vec<ChildRecord> {
        let prefix = format!("{dir}/");
        let mut children: Vec<ChildRecord> = self
            .nodes
            .iter()
            .filter(|entry| {
                entry.key().starts_with(&prefix) && !entry.key()[prefix.len()..].contains('/')
            })
            .map(|entry| ChildRecord {
                name: entry.key()[prefix.len()..].to_string(),
                payload: entry.value().payload.clone(),
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    fn emit_added(&self, path: &str) {
        self.emit(path, |name, payload| ChildEvent::Added {
            name,
            payload: payload.unwrap_or_default(),
        });
    }

    fn emit_updated(&self, path: &str) {
        self.emit(path, |name, payload| ChildEvent::Updated {
            name,
            payload: payload.unwrap_or_default(),
        });
    }

    fn emit_removed(&self, path: &str) {
        self.emit(path, |name, _| ChildEvent::Removed { name });
    }

    fn emit(
        &self,
        path: &str,
        build: impl Fn(String, Option<Vec<u8>>) -> ChildEvent,
    ) {
        let Some(idx) = path.rfind('/') else {
            return;
        };
        if idx == 0 {
            return;
        }
        let (dir, name) = (&path[..idx], &path[idx + 1..]);
        let payload = self.node(path).map(|record| record.payload);
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter().filter(|w| w.dir == dir) {
            let _ = watcher
                .tx
                .send(build(name.to_string(), payload.clone()));
        }
    }
}
