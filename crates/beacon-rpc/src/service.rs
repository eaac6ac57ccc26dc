//! 服务契约与按名派发。

use beacon_core::{CoreError, async_trait, codes};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// 注册到监听器上的单个 RPC 服务。
///
/// # 契约说明（What）
/// - `name`：派发键，调用端以同名寻址；在一个监听器内必须唯一；
/// - `call`：处理一次请求；返回的错误会以应用层失败回传调用端，
///   不会中断连接。
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn call(&self, request: Bytes) -> Result<Bytes, CoreError>;
}

/// 名称到服务实现的不可变派发表，监听器启动时固化。
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn RpcService>>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<Arc<dyn RpcService>>) -> Self {
        let services = services
            .into_iter()
            .map(|svc| (svc.name().to_string(), svc))
            .collect();
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// 按名派发一次调用；未注册的服务名返回 `rpc.unknown_service`。
    pub async fn dispatch(&self, service: &str, request: Bytes) -> Result<Bytes, CoreError> {
        match self.services.get(service) {
            Some(svc) => svc.call(request).await,
            None => Err(CoreError::new(
                codes::RPC_UNKNOWN_SERVICE,
                format!("no service registered under `{service}`"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl RpcService for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn call(&self, request: Bytes) -> Result<Bytes, CoreError> {
            Ok(Bytes::from(request.to_ascii_uppercase()))
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let registry = ServiceRegistry::new(vec![Arc::new(Upper)]);
        let reply = registry
            .dispatch("upper", Bytes::from_static(b"ok"))
            .await
            .unwrap();
        assert_eq!(&reply[..], b"OK");

        let err = registry
            .dispatch("missing", Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::RPC_UNKNOWN_SERVICE);
    }
}
