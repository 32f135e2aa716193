//! Interceptors around command and query handling.
//!
//! Two kinds, both registered per module bus:
//! - dispatch interceptors rewrite a message before it is routed
//! - handler interceptors wrap the invocation of a handler and decide
//!   whether, and with what message, the rest of the chain runs

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::HandlerResult;
use crate::registration::{Registration, Subscribers};

/// Rewrites a message on its way to the router.
pub trait MessageDispatchInterceptor<M>: Send + Sync {
    fn intercept(&self, message: M) -> M;
}

impl<F, M> MessageDispatchInterceptor<M> for F
where
    F: Fn(M) -> M + Send + Sync,
{
    fn intercept(&self, message: M) -> M {
        self(message)
    }
}

/// Wraps the invocation of a handler.
///
/// Call `chain.proceed(message)` to continue; returning without proceeding
/// short-circuits the handler.
#[async_trait]
pub trait MessageHandlerInterceptor<M: Send + 'static>: Send + Sync {
    async fn intercept(&self, message: M, chain: InterceptorChain<'_, M>) -> HandlerResult;
}

/// The handler at the end of a chain.
pub type ChainHandler<'a, M> = dyn Fn(M) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'a;

/// The remaining interceptors plus the handler they wrap.
pub struct InterceptorChain<'a, M: Send + 'static> {
    interceptors: &'a [Arc<dyn MessageHandlerInterceptor<M>>],
    handler: &'a ChainHandler<'a, M>,
}

impl<'a, M: Send + 'static> InterceptorChain<'a, M> {
    pub async fn proceed(self, message: M) -> HandlerResult {
        match self.interceptors.split_first() {
            Some((first, rest)) => {
                let chain = InterceptorChain {
                    interceptors: rest,
                    handler: self.handler,
                };
                first.intercept(message, chain).await
            }
            None => (self.handler)(message).await,
        }
    }
}

/// Dispatch and handler interceptors of one bus, in registration order.
pub struct Interceptors<M: Send + 'static> {
    dispatch: Subscribers<dyn MessageDispatchInterceptor<M>>,
    handler: Subscribers<dyn MessageHandlerInterceptor<M>>,
}

impl<M: Send + 'static> Interceptors<M> {
    pub fn new() -> Self {
        Self {
            dispatch: Subscribers::new(),
            handler: Subscribers::new(),
        }
    }

    pub fn register_dispatch(
        &self,
        interceptor: Arc<dyn MessageDispatchInterceptor<M>>,
    ) -> Registration {
        self.dispatch.add(interceptor)
    }

    pub fn register_handler(
        &self,
        interceptor: Arc<dyn MessageHandlerInterceptor<M>>,
    ) -> Registration {
        self.handler.add(interceptor)
    }

    /// Runs `message` through every dispatch interceptor.
    pub fn before_dispatch(&self, message: M) -> M {
        self.dispatch
            .snapshot()
            .iter()
            .fold(message, |message, interceptor| interceptor.intercept(message))
    }

    /// Invokes `handler` through every handler interceptor.
    pub async fn handle(&self, message: M, handler: &ChainHandler<'_, M>) -> HandlerResult {
        let interceptors = self.handler.snapshot();
        InterceptorChain {
            interceptors: &interceptors,
            handler,
        }
        .proceed(message)
        .await
    }
}

impl<M: Send + 'static> Default for Interceptors<M> {
    fn default() -> Self {
        Self::new()
    }
}
