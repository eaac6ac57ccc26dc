//! 成员镜像：由监视事件驱动的宿主集一致视图。

use arc_swap::ArcSwap;
use beacon_core::store::{ChildEvent, ChildEventStream};
use beacon_core::{Host, HostKey};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 某一时刻的成员全量视图；选路器按次取用，跨次不缓存。
///
/// # 契约说明（What）
/// - `revision`：每次状态变更单调递增，供消费端幂等刷新；
/// - 宿主按 `(address, port)` 键排序存放，读取端观察到确定性顺序；
/// - 视图不可变：读者要么看到变更 N 的全部，要么完全看不到。
#[derive(Clone, Debug)]
pub struct MembershipSnapshot {
    revision: u64,
    hosts: BTreeMap<HostKey, Host>,
}

impl MembershipSnapshot {
    pub(crate) fn new(revision: u64, hosts: BTreeMap<HostKey, Host>) -> Self {
        Self { revision, hosts }
    }

    fn empty() -> Self {
        Self::new(0, BTreeMap::new())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, key: &HostKey) -> Option<&Host> {
        self.hosts.get(key)
    }

    /// 按键序迭代全部宿主。
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }
}

/// 成员镜像：单写多读的监视流消费者。
///
/// # 设计背景（Why）
/// - 监视流单写者串行应用事件，读者通过 `arc-swap` 取得锁自由快照，
///   每次变更后另经 `watch` 通道广播版本化句柄，驱动子通道集刷新；
/// - 解码失败的事件按条丢弃并记录：在后续事件供给合法载荷之前，
///   对应节点视为不存在；镜像永不因坏事件终止。
///
/// # 契约说明（What）
/// - `FullSync` 与本地状态做差分，净效果等价于整体替换（隐含增删）；
/// - `Removed` 之后对同键的 `Added` 产生存在条目（按投递顺序应用）；
/// - [`MembershipMirror::shutdown`] 终止消费并清空快照，其后选路立即
///   报告无可用端点。
pub struct MembershipMirror {
    cell: Arc<ArcSwap<MembershipSnapshot>>,
    updates: watch::Receiver<Arc<MembershipSnapshot>>,
    consumer: JoinHandle<()>,
}

impl MembershipMirror {
    /// 启动消费任务并返回镜像句柄。
    pub fn spawn(events: ChildEventStream) -> Self {
        let cell = Arc::new(ArcSwap::from_pointee(MembershipSnapshot::empty()));
        let (tx, updates) = watch::channel(cell.load_full());
        let consumer = tokio::spawn(consume(events, Arc::clone(&cell), tx));
        Self {
            cell,
            updates,
            consumer,
        }
    }

    /// 最新快照；每次 RPC 选路都应重新读取。
    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.cell.load_full()
    }

    pub(crate) fn snapshot_cell(&self) -> Arc<ArcSwap<MembershipSnapshot>> {
        Arc::clone(&self.cell)
    }

    /// 订阅变更通知；接收端总能读到最近一次发布的快照。
    pub fn subscribe(&self) -> watch::Receiver<Arc<MembershipSnapshot>> {
        self.updates.clone()
    }

    /// 终止消费并清空快照。
    pub async fn shutdown(mut self) {
        self.consumer.abort();
        let _ = (&mut self.consumer).await;
        self.cell.store(Arc::new(MembershipSnapshot::empty()));
    }
}

async fn consume(
    mut events: ChildEventStream,
    cell: Arc<ArcSwap<MembershipSnapshot>>,
    tx: watch::Sender<Arc<MembershipSnapshot>>,
) {
    let mut hosts: BTreeMap<HostKey, Host> = BTreeMap::new();
    let mut revision = 0u64;
    while let Some(event) = events.next().await {
        if !apply(&mut hosts, event) {
            continue;
        }
        revision += 1;
        let snapshot = Arc::new(MembershipSnapshot::new(revision, hosts.clone()));
        cell.store(Arc::clone(&snapshot));
        let _ = tx.send(snapshot);
    }
    debug!(target: "beacon_balancer::mirror", "watch stream ended");
}

/// 应用一个事件，返回视图是否变化。
///
/// 变化判定对元数据敏感：`Host` 的 `==` 只看身份键，负载与隔离位的
/// 变动须另行比较，否则纯元数据更新不会触发快照发布。
fn apply(hosts: &mut BTreeMap<HostKey, Host>, event: ChildEvent) -> bool {
    match event {
        ChildEvent::FullSync(records) => {
            let mut next = BTreeMap::new();
            for record in &records {
                upsert(&mut next, &record.name, &record.payload);
            }
            let changed = !same_view(hosts, &next);
            if changed {
                debug!(
                    target: "beacon_balancer::mirror",
                    before = hosts.len(),
                    after = next.len(),
                    "full sync applied"
                );
                *hosts = next;
            }
            changed
        }
        ChildEvent::Added { name, payload } | ChildEvent::Updated { name, payload } => {
            upsert(hosts, &name, &payload)
        }
        ChildEvent::Removed { name } => match HostKey::parse(&name) {
            Some(key) => hosts.remove(&key).is_some(),
            None => {
                warn!(target: "beacon_balancer::mirror", name, "removal event with unparsable name dropped");
                false
            }
        },
    }
}

fn upsert(hosts: &mut BTreeMap<HostKey, Host>, name: &str, payload: &[u8]) -> bool {
    let Some(key) = HostKey::parse(name) else {
        warn!(target: "beacon_balancer::mirror", name, "event with unparsable name dropped");
        return false;
    };
    match Host::decode(payload) {
        Ok(host) => match hosts.insert(key, host.clone()) {
            None => true,
            Some(prev) => prev.metadata != host.metadata || prev.version != host.version,
        },
        Err(err) => {
            warn!(
                target: "beacon_balancer::mirror",
                name,
                error = %err,
                "undecodable payload; node treated as absent"
            );
            hosts.remove(&key).is_some()
        }
    }
}

fn same_view(a: &BTreeMap<HostKey, Host>, b: &BTreeMap<HostKey, Host>) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|((ka, ha), (kb, hb))| {
            ka == kb && ha.metadata == hb.metadata && ha.version == hb.version
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::HostMetadata;
    use beacon_core::store::ChildRecord;

    fn record(address: &str, port: u16, load: i32, quarantined: bool) -> ChildRecord {
        let host = Host::new(address, port, HostMetadata { load, quarantined });
        ChildRecord {
            name: host.node_name(),
            payload: host.encode().unwrap(),
        }
    }

    fn apply_all(hosts: &mut BTreeMap<HostKey, Host>, events: Vec<ChildEvent>) -> usize {
        events
            .into_iter()
            .filter(|event| apply(hosts, event.clone()))
            .count()
    }

    #[test]
    fn add_update_remove_sequence() {
        let mut hosts = BTreeMap::new();
        let a = record("a", 1, 10, false);
        let changed = apply_all(
            &mut hosts,
            vec![ChildEvent::Added {
                name: a.name.clone(),
                payload: a.payload.clone(),
            }],
        );
        assert_eq!(changed, 1);
        assert_eq!(hosts.len(), 1);

        // 相同元数据的重复事件不构成状态变更。
        let changed = apply_all(
            &mut hosts,
            vec![ChildEvent::Updated {
                name: a.name.clone(),
                payload: a.payload.clone(),
            }],
        );
        assert_eq!(changed, 0);

        // 负载变化是状态变更。
        let a2 = record("a", 1, 3, false);
        let changed = apply_all(
            &mut hosts,
            vec![ChildEvent::Updated {
                name: a2.name.clone(),
                payload: a2.payload.clone(),
            }],
        );
        assert_eq!(changed, 1);
        let key = HostKey::parse("a:1").unwrap();
        assert_eq!(hosts.get(&key).unwrap().metadata.load, 3);

        // Removed 后同键 Added 产生存在条目。
        apply_all(
            &mut hosts,
            vec![
                ChildEvent::Removed {
                    name: "a:1".to_string(),
                },
                ChildEvent::Added {
                    name: a.name.clone(),
                    payload: a.payload,
                },
            ],
        );
        assert!(hosts.contains_key(&key));
    }

    #[test]
    fn undecodable_payload_makes_node_absent() {
        let mut hosts = BTreeMap::new();
        let a = record("a", 1, 10, false);
        apply(
            &mut hosts,
            ChildEvent::Added {
                name: a.name.clone(),
                payload: a.payload,
            },
        );
        // 对已知键投递坏载荷：条目转为不存在。
        assert!(apply(
            &mut hosts,
            ChildEvent::Updated {
                name: "a:1".to_string(),
                payload: b"not json".to_vec(),
            },
        ));
        assert!(hosts.is_empty());

        // 对未知键投递坏载荷：无状态变更。
        assert!(!apply(
            &mut hosts,
            ChildEvent::Added {
                name: "b:2".to_string(),
                payload: b"{}".to_vec(),
            },
        ));
    }

    #[test]
    fn full_sync_diffs_against_current_state() {
        let mut hosts = BTreeMap::new();
        apply_all(
            &mut hosts,
            vec![
                ChildEvent::Added {
                    name: record("a", 1, 1, false).name,
                    payload: record("a", 1, 1, false).payload,
                },
                ChildEvent::Added {
                    name: record("b", 2, 2, false).name,
                    payload: record("b", 2, 2, false).payload,
                },
            ],
        );

        // 重放只含 b（负载已变）与新增 c：a 隐含删除。
        let changed = apply(
            &mut hosts,
            ChildEvent::FullSync(vec![record("b", 2, 7, false), record("c", 3, 0, false)]),
        );
        assert!(changed);
        assert_eq!(hosts.len(), 2);
        assert!(!hosts.contains_key(&HostKey::parse("a:1").unwrap()));
        assert_eq!(
            hosts
                .get(&HostKey::parse("b:2").unwrap())
                .unwrap()
                .metadata
                .load,
            7
        );

        // 内容相同的重放不触发发布。
        assert!(!apply(
            &mut hosts,
            ChildEvent::FullSync(vec![record("b", 2, 7, false), record("c", 3, 0, false)]),
        ));
    }
}
