//! 调用端连接：单条 TCP 连接上的串行请求/响应。

use crate::frame::{self, op};
use beacon_core::{CoreError, codes};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

/// 到单个端点的 RPC 连接。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 为上层子通道提供对单个服务器的调用能力，连接由首次调用建立方负责创建；
/// - 同一连接上的请求以异步互斥锁串行化，帧边界因此天然对齐，
///   无需请求编号协商。
///
/// ## 契约（What）
/// - `connect`：建立到目标地址的连接；
/// - `call`：发送一次请求并等待响应；对端的应用层失败映射为
///   `rpc.remote`，传输层失败映射为 `rpc.io` / `rpc.frame_oversize`；
/// - `close`：进入终态；其后 `call` 返回 `rpc.closed`。
///
/// ## 注意事项（Trade-offs）
/// - 串行化意味着同一子通道内无请求级并行；选路器按负载分散调用，
///   单连接吞吐不构成瓶颈时保持此最小实现。
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    stream: AsyncMutex<TcpStream>,
    peer_addr: SocketAddr,
    max_message_size: usize,
    closed: AtomicBool,
}

impl RpcClient {
    pub async fn connect(addr: SocketAddr, max_message_size: usize) -> Result<Self, CoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| frame::map_io(op::CONNECT, err))?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                stream: AsyncMutex::new(stream),
                peer_addr: addr,
                max_message_size,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// 发送一次调用并等待响应。
    pub async fn call(&self, service: &str, body: Bytes) -> Result<Bytes, CoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CoreError::new(codes::RPC_CLOSED, "client connection is closed"));
        }
        let request = frame::encode_request(service, &body)?;
        let mut guard = self.inner.stream.lock().await;
        frame::write_frame(&mut *guard, &request, self.inner.max_message_size).await?;
        let response = frame::read_frame(&mut *guard, self.inner.max_message_size).await?;
        drop(guard);
        frame::decode_response(response)
    }

    /// 关闭连接；幂等。
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl Clone for RpcClient {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
