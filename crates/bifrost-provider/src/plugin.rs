use async_trait::async_trait;

use crate::error::BifrostError;
use crate::provider::RequestContext;
use crate::request::RequestEnvelope;
use crate::response::Response;

/// One plugin pipeline decision: either continue to the next hook, or
/// short-circuit with a terminal response/error. Short-circuiting with an
/// error still runs post-hooks over the prefix that executed; it is not a
/// panic path.
pub enum PreHookOutcome {
    Continue(RequestEnvelope),
    /// Non-fatal: the hook produced an error but did not ask to short-circuit.
    /// The pipeline logs it and proceeds to the next pre-hook with `req`
    /// unchanged from what this hook returned.
    ContinueWithError(RequestEnvelope, BifrostError),
    ShortCircuitResponse(Response),
    ShortCircuitError(BifrostError),
}

/// The plugin capability. Pre-hooks run in registration order; post-hooks
/// run in reverse registration order over exactly the prefix whose pre-hook
/// executed.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// May mutate the request, or short-circuit. If a plugin wants to signal a
    /// non-fatal problem without short-circuiting, it should still return
    /// `Continue`. Pre-hook errors that aren't short-circuits are logged by
    /// the pipeline and do not stop the chain.
    async fn pre_hook(&self, ctx: &RequestContext, req: RequestEnvelope) -> PreHookOutcome;

    /// May transform either value, recover from an error (return a response,
    /// clear the error), or invalidate a response (return an error, clear the
    /// response).
    async fn post_hook(
        &self,
        ctx: &RequestContext,
        resp: Option<Response>,
        err: Option<BifrostError>,
    ) -> (Option<Response>, Option<BifrostError>);

    async fn cleanup(&self) -> Result<(), BifrostError> {
        Ok(())
    }
}
