//! 负载发布器：把样本突发折叠为每窗口至多一次的节点写入。

use crate::registration::HostNode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// 默认发布窗口。
pub const DEFAULT_LOAD_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// 发布器主循环。
///
/// # 设计背景（Why）
/// - 应用按请求粒度投递负载样本，逐条写存储会放大协调流量；
///   首个样本开启一个 `interval` 窗口，窗口内新样本只覆盖待发布值，
///   窗口关闭时写出最新值。该"节流取新"语义在样本持续饱和时仍保证
///   每窗口恰好一次发布，不会饿死下游观察者；
/// - 写失败属于尽力而为路径：记录后继续，下一个窗口自愈；
///   会话丢失额外通知监督器触发重注册。
///
/// # 契约说明（What）
/// - `samples`：队列接收半部，发布器独占消费；
/// - `shutdown`：协作式停机信号；窗口内未写出的值随停机丢弃；
/// - 发布前直接读取隔离标记：置位则跳过本次写入并保留最近发布负载。
pub(crate) async fn run(
    node: Arc<HostNode>,
    interval: Duration,
    mut samples: mpsc::UnboundedReceiver<i32>,
    session_lost: mpsc::UnboundedSender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            _ = shutdown.changed() => return,
            sample = samples.recv() => match sample {
                Some(sample) => sample,
                None => return,
            },
        };
        let mut latest = first;
        let mut queue_open = true;
        let window = tokio::time::sleep(interval);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                () = &mut window => break,
                sample = samples.recv() => match sample {
                    Some(sample) => latest = sample,
                    None => {
                        queue_open = false;
                        break;
                    }
                },
            }
        }
        publish(&node, latest, &session_lost).await;
        if !queue_open {
            return;
        }
    }
}

async fn publish(node: &HostNode, load: i32, session_lost: &mpsc::UnboundedSender<()>) {
    if node.flag().get() {
        debug!(
            target: "beacon_server::publisher",
            node = %node.node_path(),
            load,
            "quarantined; load publication suppressed"
        );
        return;
    }
    match node.write_metadata(load, false).await {
        Ok(()) => {
            node.record_published_load(load);
        }
        Err(err) => {
            warn!(
                target: "beacon_server::publisher",
                node = %node.node_path(),
                load,
                error = %err,
                "load publication failed; next window retries"
            );
            if err.code() == beacon_core::codes::STORE_SESSION_LOST {
                let _ = session_lost.send(());
            }
        }
    }
}
