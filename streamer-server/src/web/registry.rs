use dashmap::DashMap;
use http::Method;
use std::sync::Arc;
use streamer_core::{RequestHandler, Transport, TransportError};
use tracing::debug;

/// 路由处理器注册表
///
/// 以 (method, route) 为键，HTTP分发时按请求路径精确匹配。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: Arc<DashMap<(Method, String), Arc<dyn RequestHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找处理器
    pub fn lookup(&self, method: &Method, route: &str) -> Option<Arc<dyn RequestHandler>> {
        self.routes
            .get(&(method.clone(), route.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// 已注册的路由
    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut routes: Vec<_> = self.routes.iter().map(|entry| entry.key().clone()).collect();
        routes.sort_by(|a, b| a.1.cmp(&b.1));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Transport for HandlerRegistry {
    fn register(
        &self,
        route: &str,
        method: Method,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), TransportError> {
        debug!("Registering handler: {} {}", method, route);
        if self
            .routes
            .insert((method, route.to_string()), handler)
            .is_some()
        {
            debug!("Replaced existing handler for {}", route);
        }
        Ok(())
    }

    fn unregister(&self, route: &str, method: &Method) -> Result<(), TransportError> {
        debug!("Unregistering handler: {} {}", method, route);
        self.routes
            .remove(&(method.clone(), route.to_string()))
            .map(|_| ())
            .ok_or_else(|| TransportError::RouteNotFound {
                method: method.to_string(),
                route: route.to_string(),
            })
    }
}
