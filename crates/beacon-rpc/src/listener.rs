//! 监听端：接受循环、并发上限与协作式优雅停机。

use crate::frame::{self, op};
use crate::service::ServiceRegistry;
use beacon_core::CoreError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// 监听器运行参数。
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// 并发连接任务上限（信号量许可数）。
    pub worker_permits: usize,
    /// 消息大小预算，编码与解码两侧共用。
    pub max_message_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            worker_permits: 64,
            max_message_size: frame::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// 已绑定、尚未开始派发的监听器。
///
/// 绑定与启动拆分为两步：绑定即确定实际端口（支持 0 端口随机分配），
/// 上层先以 `local_addr` 解析出具体宿主身份并完成注册，再调用
/// [`RpcListener::spawn`] 进入派发循环。
pub struct RpcListener {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
}

impl RpcListener {
    pub async fn bind(addr: SocketAddr, config: ListenerConfig) -> Result<Self, CoreError> {
        let inner = TokioTcpListener::bind(addr)
            .await
            .map_err(|err| frame::map_io(op::BIND, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| frame::map_io(op::BIND, err))?;
        Ok(Self {
            inner,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 进入接受循环，返回可停机的句柄。
    pub fn spawn(self, registry: Arc<ServiceRegistry>) -> RpcServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let join = tokio::spawn(accept_loop(
            self.inner,
            self.config,
            registry,
            shutdown_rx,
        ));
        RpcServerHandle {
            local_addr,
            shutdown_tx,
            join,
        }
    }
}

/// 运行中的监听器句柄。
pub struct RpcServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RpcServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 优雅停机：停止接受新连接，等待在途请求完成。
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            warn!(target: "beacon_rpc::listener", error = %err, "accept loop join failed");
        }
    }
}

async fn accept_loop(
    listener: TokioTcpListener,
    config: ListenerConfig,
    registry: Arc<ServiceRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(config.worker_permits.max(1)));
    let mut connections = JoinSet::new();
    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(target: "beacon_rpc::listener", %peer, "connection accepted");
                let registry = Arc::clone(&registry);
                let shutdown = shutdown.clone();
                let max = config.max_message_size;
                connections.spawn(async move {
                    let _permit = permit;
                    serve_connection(stream, peer, registry, max, shutdown).await;
                });
            }
            Err(err) => {
                warn!(target: "beacon_rpc::listener", error = %err, "accept failed");
                drop(permit);
            }
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// 单连接请求循环。
///
/// 请求一旦读入便处理完毕并回写响应，停机信号只在帧间隙生效，
/// 在途请求因此总能完成。读侧错误（含对端关闭与超限帧）终止连接。
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ServiceRegistry>,
    max_message_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            payload = frame::read_frame(&mut stream, max_message_size) => payload,
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => {
                debug!(target: "beacon_rpc::listener", %peer, error = %err, "connection closed");
                break;
            }
        };
        let outcome = match frame::decode_request(payload) {
            Ok((service, body)) => registry.dispatch(&service, body).await,
            Err(err) => Err(err),
        };
        let response = frame::encode_response(&outcome);
        if let Err(err) = frame::write_frame(&mut stream, &response, max_message_size).await {
            warn!(target: "beacon_rpc::listener", %peer, error = %err, "response write failed");
            break;
        }
    }
}
