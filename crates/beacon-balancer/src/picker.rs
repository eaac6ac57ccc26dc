//! 加权选路器：每次 RPC 从最新快照选出一个端点。

use crate::mirror::MembershipSnapshot;
use arc_swap::ArcSwap;
use beacon_core::{CoreError, Host, codes};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 加权轮转选路器。
///
/// # 选路规则（What）
/// 1. 过滤隔离中的宿主；
/// 2. 过滤后为空：同步返回 `balancer.no_ready_endpoint`，调用方快速失败；
/// 3. 幸存者中取最小负载的候选集，以单调游标对候选数取模轮转。
///    等负载宿主因此获得轮转公平性，更低负载宿主获得确定性偏好。
///
/// # 新鲜度与复杂度
/// - 每次选路读取最新快照，跨 RPC 不缓存；负载的陈旧上界为一个发布窗口
///   加存储传播延迟，设计上接受而不回源探测；
/// - 无阻塞，O(n) 于快照大小；游标使用宽松序，轮转只需原子性不需同步。
pub struct WeightedPicker {
    cell: Arc<ArcSwap<MembershipSnapshot>>,
    cursor: AtomicU64,
}

impl WeightedPicker {
    pub(crate) fn new(cell: Arc<ArcSwap<MembershipSnapshot>>) -> Self {
        Self {
            cell,
            cursor: AtomicU64::new(0),
        }
    }

    /// 基于某个镜像的快照单元构造选路器。
    pub fn for_mirror(mirror: &crate::mirror::MembershipMirror) -> Self {
        Self::new(mirror.snapshot_cell())
    }

    /// 选出一个非隔离、负载最低的宿主。
    pub fn pick(&self) -> Result<Host, CoreError> {
        let snapshot = self.cell.load();
        let ready: Vec<&Host> = snapshot
            .hosts()
            .filter(|host| !host.metadata.quarantined)
            .collect();
        if ready.is_empty() {
            return Err(CoreError::new(
                codes::BALANCER_NO_READY_ENDPOINT,
                "no non-quarantined endpoint in the current snapshot",
            ));
        }
        let min_load = ready
            .iter()
            .map(|host| host.metadata.load)
            .min()
            .unwrap_or_default();
        let candidates: Vec<&Host> = ready
            .into_iter()
            .filter(|host| host.metadata.load == min_load)
            .collect();
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) as usize;
        Ok(candidates[slot % candidates.len()].clone())
    }
}
