//! 子通道集：每个宿主一条惰性建立的 RPC 连接。

use crate::mirror::MembershipSnapshot;
use beacon_core::{CoreError, Host, HostKey, codes};
use beacon_rpc::RpcClient;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// 到单个宿主的子通道。
///
/// 连接在首次调用时建立（`OnceCell` 保证并发首调只建连一次）；
/// 子通道从集合中撤除后，仍被在途调用持有的 `Arc` 维持存活，
/// 最后一个引用释放时连接随之关闭，在途 RPC 因此总能完成。
pub(crate) struct Subchannel {
    address: String,
    port: u16,
    max_message_size: usize,
    client: OnceCell<RpcClient>,
}

impl Subchannel {
    fn new(key: &HostKey, max_message_size: usize) -> Self {
        Self {
            address: key.address.clone(),
            port: key.port,
            max_message_size,
            client: OnceCell::new(),
        }
    }

    pub(crate) async fn call(&self, service: &str, body: Bytes) -> Result<Bytes, CoreError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let addr = resolve(&self.address, self.port).await?;
                debug!(
                    target: "beacon_balancer::subchannel",
                    %addr,
                    "subchannel connecting"
                );
                RpcClient::connect(addr, self.max_message_size).await
            })
            .await?;
        client.call(service, body).await
    }
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr, CoreError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((address, port))
        .await
        .map_err(|err| {
            CoreError::new(
                codes::RPC_IO,
                format!("address resolution failed for `{address}`"),
            )
            .with_cause(err)
        })?
        .next()
        .ok_or_else(|| {
            CoreError::new(codes::RPC_IO, format!("`{address}` resolved to no address"))
        })
}

/// 与成员快照保持一致的子通道表。
///
/// 镜像每发布一次快照，刷新任务即调用 [`SubchannelSet::sync`]：
/// 为新增宿主建表项（连接仍然惰性）、撤除已离场宿主的表项。
pub(crate) struct SubchannelSet {
    max_message_size: usize,
    entries: DashMap<HostKey, Arc<Subchannel>>,
}

impl SubchannelSet {
    pub(crate) fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get_or_create(&self, host: &Host) -> Arc<Subchannel> {
        let key = host.key();
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Subchannel::new(&key, self.max_message_size)))
            .clone()
    }

    pub(crate) fn sync(&self, snapshot: &MembershipSnapshot) {
        for host in snapshot.hosts() {
            self.get_or_create(host);
        }
        self.entries.retain(|key, _| snapshot.get(key).is_some());
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
