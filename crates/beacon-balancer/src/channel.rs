//! 客户端通道：镜像、选路与子通道集的装配与停机。

use crate::mirror::{MembershipMirror, MembershipSnapshot};
use crate::picker::WeightedPicker;
use crate::subchannel::SubchannelSet;
use beacon_core::store::CoordinationStore;
use beacon_core::{CoreError, DiscoveryPath};
use beacon_rpc::{DEFAULT_MAX_MESSAGE_SIZE, TlsMaterial};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 负载均衡策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LbPolicy {
    /// 最低负载优先，等负载轮转。
    RoundRobinWeighted,
}

/// 通道构造设置。
///
/// # 契约说明（What）
/// - `service_discovery_path`：订阅的注册目录；
/// - `coordination_client`：存储客户端句柄；`owns_coordination_client`
///   决定停机时是否随通道一并关闭，默认由通道拥有并关闭；
/// - `max_message_size`：子通道的消息大小预算，默认 4 MiB；
/// - TLS 材料与鉴权令牌按不透明值透传，本参考传输不终结 TLS。
pub struct ChannelSettings {
    service_discovery_path: DiscoveryPath,
    lb_policy: LbPolicy,
    coordination_client: Arc<dyn CoordinationStore>,
    owns_coordination_client: bool,
    max_message_size: usize,
    tls_material: Option<TlsMaterial>,
    auth_token: Option<String>,
}

impl ChannelSettings {
    pub fn new(
        service_discovery_path: DiscoveryPath,
        coordination_client: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            service_discovery_path,
            lb_policy: LbPolicy::RoundRobinWeighted,
            coordination_client,
            owns_coordination_client: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tls_material: None,
            auth_token: None,
        }
    }

    pub fn with_lb_policy(mut self, policy: LbPolicy) -> Self {
        self.lb_policy = policy;
        self
    }

    pub fn with_owns_coordination_client(mut self, owns: bool) -> Self {
        self.owns_coordination_client = owns;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_tls_material(mut self, material: TlsMaterial) -> Self {
        self.tls_material = Some(material);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// 透传的 TLS 材料（若有）。
    pub fn tls_material(&self) -> Option<&TlsMaterial> {
        self.tls_material.as_ref()
    }

    /// 透传的鉴权令牌（若有）。
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

/// 面向注册目录的客户端通道。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 把三个协作部件装配为一个句柄：镜像维持成员视图，选路器按次取用
///   最新快照，子通道集把宿主映射为惰性连接；
/// - 调用方只面对 [`Channel::call`]：选路、建连、派发收敛在通道内部。
///
/// ## 契约（What）
/// - [`Channel::of`]：按设置构造通道并立即开始订阅；
/// - [`Channel::call`]：按加权策略选出端点并发出一次调用；
///   快照中无可用端点时同步失败，不在通道内部重试；
/// - [`Channel::shutdown`]：终止镜像（其后选路立即报告无可用端点）、
///   撤除全部子通道，并在通道拥有存储客户端时将其关闭至终态。
pub struct Channel {
    mirror: MembershipMirror,
    picker: WeightedPicker,
    subchannels: Arc<SubchannelSet>,
    refresher: JoinHandle<()>,
    store: Arc<dyn CoordinationStore>,
    owns_store: bool,
}

impl Channel {
    /// 构造通道并开始订阅注册目录。
    pub fn of(settings: ChannelSettings) -> Self {
        let ChannelSettings {
            service_discovery_path,
            lb_policy,
            coordination_client,
            owns_coordination_client,
            max_message_size,
            ..
        } = settings;
        // 目前唯一的策略；新增策略时在此分派。
        let LbPolicy::RoundRobinWeighted = lb_policy;

        let events = coordination_client.watch_children(&service_discovery_path);
        let mirror = MembershipMirror::spawn(events);
        let picker = WeightedPicker::new(mirror.snapshot_cell());
        let subchannels = Arc::new(SubchannelSet::new(max_message_size));
        let refresher = tokio::spawn(refresh_loop(mirror.subscribe(), Arc::clone(&subchannels)));
        info!(
            target: "beacon_balancer::channel",
            path = %service_discovery_path,
            "channel subscribed"
        );
        Self {
            mirror,
            picker,
            subchannels,
            refresher,
            store: coordination_client,
            owns_store: owns_coordination_client,
        }
    }

    /// 按加权策略发出一次调用。
    pub async fn call(&self, service: &str, body: Bytes) -> Result<Bytes, CoreError> {
        let host = self.picker.pick()?;
        let subchannel = self.subchannels.get_or_create(&host);
        subchannel.call(service, body).await
    }

    /// 当前成员快照，供观测与测试使用。
    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.mirror.snapshot()
    }

    /// 拆除通道。
    pub async fn shutdown(self) {
        let Channel {
            mirror,
            picker: _,
            subchannels,
            refresher,
            store,
            owns_store,
        } = self;
        refresher.abort();
        let _ = refresher.await;
        mirror.shutdown().await;
        subchannels.clear();
        if owns_store && let Err(err) = store.close().await {
            warn!(
                target: "beacon_balancer::channel",
                error = %err,
                "coordination client close failed"
            );
        }
        info!(target: "beacon_balancer::channel", "channel stopped");
    }
}

/// 把每次快照发布同步到子通道表。
async fn refresh_loop(
    mut updates: watch::Receiver<Arc<MembershipSnapshot>>,
    subchannels: Arc<SubchannelSet>,
) {
    loop {
        let snapshot = Arc::clone(&updates.borrow_and_update());
        subchannels.sync(&snapshot);
        if updates.changed().await.is_err() {
            return;
        }
    }
}
