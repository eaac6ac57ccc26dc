//! 服务器生命周期：身份解析、注册、任务装配与优雅停机。

use crate::load::{LoadQueue, QuarantineFlag};
use crate::publisher::{self, DEFAULT_LOAD_UPDATE_INTERVAL};
use crate::registration::{self, HostNode};
use beacon_core::store::CoordinationStore;
use beacon_core::{CoreError, DiscoveryPath, Host, codes};
use beacon_rpc::{
    DEFAULT_MAX_MESSAGE_SIZE, ListenerConfig, RpcListener, RpcServerHandle, RpcService,
    ServiceRegistry, TlsMaterial,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 重注册重试间隔。
const REREGISTER_BACKOFF: Duration = Duration::from_millis(200);

/// 服务器启动设置。
///
/// # 契约说明（What）
/// - `services` 非空是启动前置条件；
/// - `port` 为 0 时由监听器分配，解析出的端口进入注册身份；
/// - `boss_threads` 为接受循环数量（当前实现固定一条，取值仍须 ≥ 1）；
///   `worker_threads` 约束并发连接任务数；
/// - `queue` 与 `quarantined` 是调用方共享的句柄：前者承接
///   `assign_load` 样本，后者允许在启动前预置隔离状态。
pub struct ServerSettings {
    discovery_path: DiscoveryPath,
    address: String,
    port: u16,
    services: Vec<Arc<dyn RpcService>>,
    coordination_client: Arc<dyn CoordinationStore>,
    queue: LoadQueue,
    quarantined: QuarantineFlag,
    load_update_interval: Duration,
    boss_threads: usize,
    worker_threads: usize,
    max_message_size: usize,
    tls_material: Option<TlsMaterial>,
    auth_token: Option<String>,
}

impl ServerSettings {
    pub fn new(
        discovery_path: DiscoveryPath,
        address: impl Into<String>,
        port: u16,
        services: Vec<Arc<dyn RpcService>>,
        coordination_client: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            discovery_path,
            address: address.into(),
            port,
            services,
            coordination_client,
            queue: LoadQueue::new(),
            quarantined: QuarantineFlag::new(),
            load_update_interval: DEFAULT_LOAD_UPDATE_INTERVAL,
            boss_threads: 1,
            worker_threads: 64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tls_material: None,
            auth_token: None,
        }
    }

    pub fn with_queue(mut self, queue: LoadQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_quarantine_flag(mut self, flag: QuarantineFlag) -> Self {
        self.quarantined = flag;
        self
    }

    pub fn with_load_update_interval(mut self, interval: Duration) -> Self {
        self.load_update_interval = interval;
        self
    }

    pub fn with_boss_threads(mut self, boss_threads: usize) -> Self {
        self.boss_threads = boss_threads;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
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

    fn validate(&self) -> Result<(), CoreError> {
        if self.services.is_empty() {
            return Err(CoreError::new(
                codes::SERVER_INVALID_SETTINGS,
                "at least one service must be registered",
            ));
        }
        if self.boss_threads == 0 {
            return Err(CoreError::new(
                codes::SERVER_INVALID_SETTINGS,
                "boss_threads must be at least 1",
            ));
        }
        Ok(())
    }
}

/// 运行中的服务器句柄。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 服务器持有各任务的句柄，任务只持有身份值拷贝与 `Arc`，
///   生命周期与发布器之间不存在环引用；
/// - 停机顺序固定：先停发布器与监督器（窗口内未发布的值丢弃），
///   再停监听器（在途 RPC 完成后退出）；临时节点随会话结束消失，
///   不做显式删除。
///
/// ## 契约（What）
/// - [`Server::assign_load`]：入队一个负载样本，非阻塞；
/// - [`Server::enter_quarantine`] / [`Server::exit_quarantine`]：
///   原子翻转隔离标记并同步一次节点元数据；
/// - [`Server::host`]：解析后的注册身份（含最近发布元数据）；
/// - [`Server::shutdown`]：消费句柄，完成上述停机顺序。
pub struct Server {
    node: Arc<HostNode>,
    queue: LoadQueue,
    shutdown_tx: watch::Sender<bool>,
    publisher: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    rpc: RpcServerHandle,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    /// 启动：解析身份、绑定监听、注册、装配发布器与监督器。
    pub async fn start(settings: ServerSettings) -> Result<Self, CoreError> {
        settings.validate()?;
        let ServerSettings {
            discovery_path,
            address,
            port,
            services,
            coordination_client,
            queue,
            quarantined,
            load_update_interval,
            worker_threads,
            max_message_size,
            ..
        } = settings;

        let bind_ip: IpAddr = address
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let listener = RpcListener::bind(
            SocketAddr::new(bind_ip, port),
            ListenerConfig {
                worker_permits: worker_threads,
                max_message_size,
            },
        )
        .await?;
        let resolved_port = listener.local_addr().port();

        let node = HostNode::new(
            address,
            resolved_port,
            discovery_path,
            coordination_client,
            quarantined,
        );
        node.register().await?;
        info!(
            target: "beacon_server::lifecycle",
            node = %node.node_path(),
            "server registered"
        );

        let rpc = listener.spawn(Arc::new(ServiceRegistry::new(services)));

        let samples = queue.take_receiver().ok_or_else(|| {
            CoreError::new(
                codes::SERVER_INVALID_SETTINGS,
                "load queue is already consumed by another server",
            )
        })?;
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publisher = tokio::spawn(publisher::run(
            Arc::clone(&node),
            load_update_interval,
            samples,
            lost_tx,
            shutdown_rx.clone(),
        ));
        let supervisor = tokio::spawn(supervise(Arc::clone(&node), lost_rx, shutdown_rx));

        Ok(Self {
            node,
            queue,
            shutdown_tx,
            publisher,
            supervisor,
            rpc,
        })
    }

    /// 入队一个负载样本。
    pub fn assign_load(&self, load: i32) {
        self.queue.assign(load);
    }

    /// 进入隔离：返回后发布器拉取的任何样本都观察到置位。
    pub async fn enter_quarantine(&self) -> Result<(), CoreError> {
        registration::set_quarantined(&self.node, true).await
    }

    /// 退出隔离。
    pub async fn exit_quarantine(&self) -> Result<(), CoreError> {
        registration::set_quarantined(&self.node, false).await
    }

    /// 解析后的注册身份。
    pub fn host(&self) -> Host {
        self.node.identity()
    }

    /// 优雅停机。
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.publisher.await {
            warn!(target: "beacon_server::lifecycle", error = %err, "publisher join failed");
        }
        if let Err(err) = self.supervisor.await {
            warn!(target: "beacon_server::lifecycle", error = %err, "supervisor join failed");
        }
        self.rpc.shutdown().await;
        info!(target: "beacon_server::lifecycle", node = %self.node.node_path(), "server stopped");
    }
}

/// 生命周期监督器：会话丢失后重建注册。
///
/// 发布器在 `set_data` 观察到会话丢失时发出信号；监督器收敛重复信号，
/// 以固定退避重试注册直至成功或停机。临时节点已随旧会话消失，
/// 重建使用最近发布的元数据。
async fn supervise(
    node: Arc<HostNode>,
    mut lost: mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            signal = lost.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }
        while lost.try_recv().is_ok() {}
        loop {
            match node.register().await {
                Ok(()) => {
                    info!(
                        target: "beacon_server::lifecycle",
                        node = %node.node_path(),
                        "re-registered after session loss"
                    );
                    break;
                }
                Err(err) => {
                    warn!(
                        target: "beacon_server::lifecycle",
                        node = %node.node_path(),
                        error = %err,
                        "re-registration failed; retrying"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(REREGISTER_BACKOFF) => {}
                    }
                }
            }
        }
    }
}
