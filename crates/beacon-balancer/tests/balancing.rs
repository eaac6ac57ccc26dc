//! 端到端均衡测试：真实套接字 + 进程内 ensemble。
//!
//! # 测试目标（Why）
//! - 验证完整链路：服务器注册并发布负载，通道镜像目录、按加权策略选路、
//!   通过子通道发出真实 RPC；
//! - 覆盖的场景：双服务器最低负载优先、后来者承接流量、隔离隐藏宿主、
//!   成员收敛、超限消息边界、优雅停机后存储客户端进入终态
//!   （负载写入的反映时延见 beacon-server 的集成测试）。
//!
//! # 结构约定（How）
//! - 每个用例使用独立 ensemble 与注册目录；
//! - 所有等待以"轮询快照 + 5 秒上限"表达，不对调度时序做脆弱假设。

use beacon_balancer::{Channel, ChannelSettings, MembershipSnapshot};
use beacon_core::{CoordinationStore, CoreError, DiscoveryPath, async_trait, codes};
use beacon_rpc::RpcService;
use beacon_server::{Server, ServerSettings};
use beacon_store_memory::{ClientStatus, MemoryCoordinationClient, MemoryEnsemble};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 回声服务：应答携带服务器标签，便于统计各端点的实际流量。
struct Ident {
    tag: String,
}

#[async_trait]
impl RpcService for Ident {
    fn name(&self) -> &str {
        "ident"
    }

    async fn call(&self, _request: Bytes) -> Result<Bytes, CoreError> {
        Ok(Bytes::from(self.tag.clone()))
    }
}

struct Echo;

#[async_trait]
impl RpcService for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn call(&self, request: Bytes) -> Result<Bytes, CoreError> {
        Ok(request)
    }
}

fn dir() -> DiscoveryPath {
    DiscoveryPath::new("/grpc/balancing").expect("测试路径合法")
}

/// 按 `RUST_LOG` 打开测试日志；重复初始化静默忽略。
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn start_tagged_server(ensemble: &Arc<MemoryEnsemble>, tag: &str) -> Server {
    let client = MemoryCoordinationClient::connect(Arc::clone(ensemble));
    let settings = ServerSettings::new(
        dir(),
        "127.0.0.1",
        0,
        vec![Arc::new(Ident {
            tag: tag.to_string(),
        })],
        client,
    )
    .with_load_update_interval(Duration::from_millis(50));
    Server::start(settings).await.expect("服务器应成功启动")
}

fn open_channel(ensemble: &Arc<MemoryEnsemble>) -> (Channel, Arc<MemoryCoordinationClient>) {
    let client = MemoryCoordinationClient::connect(Arc::clone(ensemble));
    let channel = Channel::of(ChannelSettings::new(dir(), client.clone()));
    (channel, client)
}

async fn await_snapshot<F>(channel: &Channel, what: &str, pred: F) -> Arc<MembershipSnapshot>
where
    F: Fn(&MembershipSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = channel.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "等待快照条件超时：{what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn tally(channel: &Channel, calls: usize) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..calls {
        let reply = channel
            .call("ident", Bytes::new())
            .await
            .expect("选路与调用应成功");
        let tag = String::from_utf8(reply.to_vec()).expect("标签为 UTF-8");
        *counts.entry(tag).or_insert(0) += 1;
    }
    counts
}

#[tokio::test]
async fn two_servers_least_busy_takes_the_traffic() {
    init_tracing();
    let ensemble = MemoryEnsemble::shared();
    let s1 = start_tagged_server(&ensemble, "s1").await;
    let s2 = start_tagged_server(&ensemble, "s2").await;
    let (channel, _client) = open_channel(&ensemble);

    s1.assign_load(1);
    s2.assign_load(5);
    let (k1, k2) = (s1.host().key(), s2.host().key());
    await_snapshot(&channel, "两台服务器的负载均已反映", |snap| {
        snap.get(&k1).is_some_and(|h| h.metadata.load == 1)
            && snap.get(&k2).is_some_and(|h| h.metadata.load == 5)
    })
    .await;

    let counts = tally(&channel, 100).await;
    let served_by_s1 = counts.get("s1").copied().unwrap_or(0);
    assert!(
        served_by_s1 >= 95,
        "低负载服务器应承接绝大多数流量，实际 {counts:?}"
    );

    channel.shutdown().await;
    s1.shutdown().await;
    s2.shutdown().await;
}

#[tokio::test]
async fn late_joiner_with_zero_load_absorbs_traffic_and_quarantine_hides_it() {
    init_tracing();
    let ensemble = MemoryEnsemble::shared();
    let s1 = start_tagged_server(&ensemble, "s1").await;
    let s2 = start_tagged_server(&ensemble, "s2").await;
    let (channel, _client) = open_channel(&ensemble);

    s1.assign_load(3);
    s2.assign_load(2);
    let (k1, k2) = (s1.host().key(), s2.host().key());
    await_snapshot(&channel, "既有两台服务器的负载均已反映", |snap| {
        snap.get(&k1).is_some_and(|h| h.metadata.load == 3)
            && snap.get(&k2).is_some_and(|h| h.metadata.load == 2)
    })
    .await;
    let warmup = tally(&channel, 100).await;
    assert!(warmup.get("s2").copied().unwrap_or(0) >= 95, "预热流量应走低负载端点");

    // 后来者以零负载加入。
    let s3 = start_tagged_server(&ensemble, "s3").await;
    let k3 = s3.host().key();
    await_snapshot(&channel, "后来者可见且负载为零", |snap| {
        snap.get(&k3).is_some_and(|h| h.metadata.load == 0)
    })
    .await;

    let counts = tally(&channel, 1000).await;
    assert!(
        counts.get("s3").copied().unwrap_or(0) >= 800,
        "零负载的后来者应承接至少八成流量，实际 {counts:?}"
    );

    // 隔离把宿主从选路中移除。
    s3.enter_quarantine().await.expect("隔离写入应成功");
    await_snapshot(&channel, "后来者的隔离位已可见", |snap| {
        snap.get(&k3).is_some_and(|h| h.metadata.quarantined)
    })
    .await;
    let counts = tally(&channel, 1000).await;
    assert_eq!(
        counts.get("s3").copied().unwrap_or(0),
        0,
        "隔离中的宿主不得承接任何流量，实际 {counts:?}"
    );

    // 解除隔离后恢复承接。
    s3.exit_quarantine().await.expect("解除隔离写入应成功");
    await_snapshot(&channel, "后来者的隔离位已清除", |snap| {
        snap.get(&k3).is_some_and(|h| !h.metadata.quarantined)
    })
    .await;
    let counts = tally(&channel, 1000).await;
    assert!(
        counts.get("s3").copied().unwrap_or(0) >= 800,
        "解除隔离后应重新承接流量，实际 {counts:?}"
    );

    channel.shutdown().await;
    for server in [s1, s2, s3] {
        server.shutdown().await;
    }
}

#[tokio::test]
async fn membership_converges_after_server_departure() {
    init_tracing();
    let ensemble = MemoryEnsemble::shared();
    let departing_client = MemoryCoordinationClient::connect(ensemble.clone());
    let settings = ServerSettings::new(
        dir(),
        "127.0.0.1",
        0,
        vec![Arc::new(Ident {
            tag: "dep".to_string(),
        })],
        departing_client.clone(),
    )
    .with_load_update_interval(Duration::from_millis(50));
    let departing = Server::start(settings).await.expect("启动");
    let staying = start_tagged_server(&ensemble, "stay").await;
    let (channel, _client) = open_channel(&ensemble);

    await_snapshot(&channel, "两台服务器均可见", |snap| snap.len() == 2).await;

    // 服务器停机后由属主关闭存储客户端，会话结束、临时节点消失。
    departing.shutdown().await;
    departing_client.close().await.expect("关闭客户端");

    let snapshot = await_snapshot(&channel, "离场服务器已从镜像移除", |snap| snap.len() == 1).await;
    assert_eq!(
        snapshot.hosts().next().map(|h| h.key()),
        Some(staying.host().key())
    );

    // 模拟监视重建：全量重放与镜像现状一致，不应引入虚假变更。
    let settled = channel.snapshot().revision();
    ensemble.trigger_resync(dir().as_str());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = channel.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.revision(), settled, "等价重放不应触发快照发布");

    channel.shutdown().await;
    staying.shutdown().await;
}

#[tokio::test]
async fn empty_directory_fails_fast_with_no_ready_endpoint() {
    init_tracing();
    let ensemble = MemoryEnsemble::shared();
    let (channel, _client) = open_channel(&ensemble);

    let err = channel
        .call("ident", Bytes::new())
        .await
        .expect_err("空目录下选路应快速失败");
    assert_eq!(err.code(), codes::BALANCER_NO_READY_ENDPOINT);

    channel.shutdown().await;
}

#[tokio::test]
async fn message_size_budget_boundary() {
    init_tracing();
    let eight_mb = 8 * 1024 * 1024;
    let ensemble = MemoryEnsemble::shared();
    let client = MemoryCoordinationClient::connect(ensemble.clone());
    let settings = ServerSettings::new(dir(), "127.0.0.1", 0, vec![Arc::new(Echo)], client)
        .with_load_update_interval(Duration::from_millis(50))
        .with_max_message_size(10_000_000);
    let server = Server::start(settings).await.expect("启动");

    // 预算放宽到 10 MB：8 MB 载荷完整往返。
    let roomy_client = MemoryCoordinationClient::connect(ensemble.clone());
    let roomy = Channel::of(
        ChannelSettings::new(dir(), roomy_client).with_max_message_size(10_000_000),
    );
    await_snapshot(&roomy, "服务器可见", |snap| snap.len() == 1).await;
    let reply = roomy
        .call("echo", Bytes::from(vec![1u8; eight_mb]))
        .await
        .expect("放宽预算后应成功");
    assert_eq!(reply.len(), eight_mb);
    roomy.shutdown().await;

    // 默认预算（4 MiB）：同一载荷被尺寸限制拒绝。
    let (strict, _client) = open_channel(&ensemble);
    await_snapshot(&strict, "服务器可见", |snap| snap.len() == 1).await;
    let err = strict
        .call("echo", Bytes::from(vec![1u8; eight_mb]))
        .await
        .expect_err("默认预算应拒绝 8 MB 载荷");
    assert_eq!(err.code(), codes::RPC_FRAME_OVERSIZE);
    strict.shutdown().await;

    server.shutdown().await;
}

#[tokio::test]
async fn channel_shutdown_stops_owned_coordination_client() {
    init_tracing();
    let ensemble = MemoryEnsemble::shared();
    let server = start_tagged_server(&ensemble, "s1").await;
    let (channel, client) = open_channel(&ensemble);
    await_snapshot(&channel, "服务器可见", |snap| snap.len() == 1).await;

    channel.shutdown().await;
    assert_eq!(
        client.status(),
        ClientStatus::Stopped,
        "通道拥有的存储客户端应随停机进入终态"
    );

    server.shutdown().await;
}
