//! 负载样本队列与隔离标记：服务器侧的两个共享句柄。

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// 无界的负载样本 FIFO。
///
/// # 契约说明（What）
/// - 生产端：任意多个克隆句柄通过 [`LoadQueue::assign`] 入队；
/// - 消费端：发布器独占，接收半部只能被取走一次；
/// - 队列与服务器同生命周期；服务器停机后继续入队的样本被静默丢弃
///   （记录 debug 日志）。
#[derive(Clone)]
pub struct LoadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: mpsc::UnboundedSender<i32>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<i32>>>,
}

impl Default for LoadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                tx,
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// 入队一个负载样本。
    pub fn assign(&self, load: i32) {
        if self.inner.tx.send(load).is_err() {
            debug!(target: "beacon_server::load", load, "publisher gone; load sample dropped");
        }
    }

    /// 取走接收半部；只有第一次调用返回 `Some`。
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<i32>> {
        self.inner.rx.lock().take()
    }
}

/// 每服务器一个的隔离标记，多写方原子翻转。
///
/// 顺序保证：`set` 与发布器侧的 `get` 均为顺序一致读写，
/// `enter_quarantine` 返回后发布器拉取的任何样本都观察到置位。
#[derive(Clone, Default)]
pub struct QuarantineFlag {
    inner: Arc<AtomicBool>,
}

impl QuarantineFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// 置位并返回旧值。
    pub fn set(&self, value: bool) -> bool {
        self.inner.swap(value, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_receiver_is_exclusive() {
        let queue = LoadQueue::new();
        queue.assign(3);
        queue.assign(9);
        let mut rx = queue.take_receiver().expect("首次取走接收端");
        assert!(queue.take_receiver().is_none(), "接收端只能被取走一次");
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.recv().await, Some(9));

        drop(rx);
        queue.assign(42); // 消费端消失后入队不 panic
    }

    #[test]
    fn flag_swap_returns_previous_value() {
        let flag = QuarantineFlag::new();
        assert!(!flag.get());
        assert!(!flag.set(true));
        assert!(flag.get());
        assert!(flag.set(false));
    }
}
