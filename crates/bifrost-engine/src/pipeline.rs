use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bifrost_provider::{
    BifrostError, Plugin, PostHookRunner, PreHookOutcome, RequestContext, RequestEnvelope,
    Response, StreamElement,
};

use crate::pool::Poolable;

/// Pooled plugin-pipeline scratch: how many pre-hooks actually ran (N)
/// plus the non-fatal errors collected along the way, for logging.
#[derive(Default)]
pub struct PipelineRecord {
    pub executed: usize,
    pub pre_hook_errors: Vec<(String, BifrostError)>,
}

impl Poolable for PipelineRecord {
    fn reset(&mut self) {
        self.executed = 0;
        self.pre_hook_errors.clear();
    }
}

pub enum PreHookResult {
    Proceed(RequestEnvelope),
    ShortCircuit {
        response: Option<Response>,
        error: Option<BifrostError>,
    },
}

/// Runs pre-hooks in registration order. Stops at the first
/// short-circuit; a non-short-circuiting error is logged and the chain
/// continues. `record.executed` always ends up equal to the number of
/// pre-hooks that ran, which is exactly the prefix `run_post_hooks` must
/// traverse in reverse.
pub async fn run_pre_hooks(
    plugins: &[Arc<dyn Plugin>],
    ctx: &RequestContext,
    mut req: RequestEnvelope,
    record: &mut PipelineRecord,
) -> PreHookResult {
    for plugin in plugins {
        match plugin.pre_hook(ctx, req).await {
            PreHookOutcome::Continue(next) => {
                req = next;
                record.executed += 1;
            }
            PreHookOutcome::ContinueWithError(next, err) => {
                req = next;
                record.executed += 1;
                tracing::warn!(plugin = plugin.name(), error = %err.error.message, "pre-hook error, continuing");
                record.pre_hook_errors.push((plugin.name().to_string(), err));
            }
            PreHookOutcome::ShortCircuitResponse(resp) => {
                record.executed += 1;
                return PreHookResult::ShortCircuit {
                    response: Some(resp),
                    error: None,
                };
            }
            PreHookOutcome::ShortCircuitError(err) => {
                record.executed += 1;
                return PreHookResult::ShortCircuit {
                    response: None,
                    error: Some(err),
                };
            }
        }
    }
    PreHookResult::Proceed(req)
}

/// Runs post-hooks in reverse registration order over exactly the first `n`
/// plugins, then applies the final-reconciliation rule.
pub async fn run_post_hooks(
    plugins: &[Arc<dyn Plugin>],
    ctx: &RequestContext,
    n: usize,
    mut resp: Option<Response>,
    mut err: Option<BifrostError>,
) -> (Option<Response>, Option<BifrostError>) {
    for plugin in plugins[..n].iter().rev() {
        let (r, e) = plugin.post_hook(ctx, resp, err).await;
        resp = r;
        err = e;
    }
    reconcile(resp, err)
}

/// Final reconciliation: if both are set, the error wins unless it is
/// structurally empty, in which case the response is returned.
fn reconcile(
    resp: Option<Response>,
    err: Option<BifrostError>,
) -> (Option<Response>, Option<BifrostError>) {
    match (resp, err) {
        (Some(resp), Some(err)) if err.is_structurally_empty() => (Some(resp), None),
        (Some(_), Some(err)) => (None, Some(err)),
        (resp, err) => (resp, err),
    }
}

/// Builds the per-element runner an adapter invokes for a streaming request:
/// each `StreamElement` is folded through the same reversed prefix of
/// post-hooks a non-streaming response would see, treating a `Delta` as a
/// response-shaped payload and a `Terminal` error as the error slot.
pub fn build_stream_post_hook_runner(
    plugins: Arc<[Arc<dyn Plugin>]>,
    ctx: RequestContext,
    n: usize,
) -> PostHookRunner {
    Arc::new(move |element: StreamElement| -> Pin<Box<dyn Future<Output = StreamElement> + Send>> {
        let plugins = plugins.clone();
        let ctx = ctx.clone();
        Box::pin(async move {
            let (resp, err) = match element {
                StreamElement::Delta(value) => (Some(Response::new(value)), None),
                StreamElement::Terminal(err) => (None, err),
            };
            let mut resp = resp;
            let mut err = err;
            for plugin in plugins[..n].iter().rev() {
                let (r, e) = plugin.post_hook(&ctx, resp, err).await;
                resp = r;
                err = e;
            }
            match (resp, err) {
                (Some(resp), Some(err)) if err.is_structurally_empty() => {
                    StreamElement::Delta(resp.body)
                }
                (Some(_), Some(err)) => StreamElement::Terminal(Some(err)),
                (Some(resp), None) => StreamElement::Delta(resp.body),
                (None, err) => StreamElement::Terminal(err),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bifrost_provider::{Input, Params};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RequestContext {
        RequestContext::new("trace", CancellationToken::new())
    }

    fn req() -> RequestEnvelope {
        RequestEnvelope {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            input: Input::ChatCompletion(serde_json::json!({"messages": []})),
            params: Params::default(),
            fallbacks: vec![],
        }
    }

    struct Passthrough;
    #[async_trait]
    impl Plugin for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }
        async fn pre_hook(&self, _ctx: &RequestContext, req: RequestEnvelope) -> PreHookOutcome {
            PreHookOutcome::Continue(req)
        }
        async fn post_hook(
            &self,
            _ctx: &RequestContext,
            resp: Option<Response>,
            err: Option<BifrostError>,
        ) -> (Option<Response>, Option<BifrostError>) {
            (resp, err)
        }
    }

    struct ShortCircuitAt(usize);
    #[async_trait]
    impl Plugin for ShortCircuitAt {
        fn name(&self) -> &str {
            "short-circuit"
        }
        async fn pre_hook(&self, _ctx: &RequestContext, _req: RequestEnvelope) -> PreHookOutcome {
            let _ = self.0;
            PreHookOutcome::ShortCircuitResponse(Response::new(serde_json::json!({"cached": true})))
        }
        async fn post_hook(
            &self,
            _ctx: &RequestContext,
            resp: Option<Response>,
            err: Option<BifrostError>,
        ) -> (Option<Response>, Option<BifrostError>) {
            (resp, err)
        }
    }

    #[tokio::test]
    async fn short_circuit_runs_post_hooks_only_over_executed_prefix() {
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        struct Tracking(&'static str, Arc<tokio::sync::Mutex<Vec<&'static str>>>);
        #[async_trait]
        impl Plugin for Tracking {
            fn name(&self) -> &str {
                self.0
            }
            async fn pre_hook(
                &self,
                _ctx: &RequestContext,
                req: RequestEnvelope,
            ) -> PreHookOutcome {
                PreHookOutcome::Continue(req)
            }
            async fn post_hook(
                &self,
                _ctx: &RequestContext,
                resp: Option<Response>,
                err: Option<BifrostError>,
            ) -> (Option<Response>, Option<BifrostError>) {
                self.1.lock().await.push(self.0);
                (resp, err)
            }
        }

        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(Tracking("one", order.clone())),
            Arc::new(ShortCircuitAt(0)),
            Arc::new(Tracking("never", order.clone())),
        ];

        let mut record = PipelineRecord::default();
        let outcome = run_pre_hooks(&plugins, &ctx(), req(), &mut record).await;
        let PreHookResult::ShortCircuit { response, error } = outcome else {
            panic!("expected short-circuit");
        };
        assert_eq!(record.executed, 2);
        let (resp, err) = run_post_hooks(&plugins, &ctx(), record.executed, response, error).await;
        assert!(err.is_none());
        assert!(resp.is_some());
        assert_eq!(*order.lock().await, vec!["one"]);
    }

    #[tokio::test]
    async fn structurally_empty_error_loses_to_response() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Passthrough)];
        let resp = Some(Response::new(serde_json::json!({"ok": true})));
        let err = Some(BifrostError::default());
        let (resp, err) = run_post_hooks(&plugins, &ctx(), 1, resp, err).await;
        assert!(resp.is_some());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn real_error_wins_over_response() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Passthrough)];
        let resp = Some(Response::new(serde_json::json!({"ok": true})));
        let err = Some(BifrostError::new("openai", "boom").with_status(500));
        let (resp, err) = run_post_hooks(&plugins, &ctx(), 1, resp, err).await;
        assert!(resp.is_none());
        assert!(err.is_some());
    }
}
