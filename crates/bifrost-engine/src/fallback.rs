use bifrost_provider::{BifrostError, FallbackEntry, RequestEnvelope};

/// The outcome of admitting one (provider, model) attempt, before the
/// fallback cascade decides whether to keep going.
pub(crate) enum Attempt<T> {
    Success(T),
    Failure(BifrostError),
}

/// Runs the primary provider then, on a cascadable failure, each fallback in
/// order. `call` performs one admission+await against a single
/// (provider, model) pair; it is generic so the same cascade logic serves
/// both non-streaming and streaming dispatch.
pub(crate) async fn with_fallback<T, F, Fut>(
    envelope: &RequestEnvelope,
    mut call: F,
) -> Result<T, BifrostError>
where
    F: FnMut(String, String) -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let primary_provider = envelope.provider.clone();
    let primary_model = envelope.model.clone();

    let primary_err = match call(primary_provider.clone(), primary_model).await {
        Attempt::Success(value) => return Ok(value),
        Attempt::Failure(err) => err,
    };

    if primary_err.blocks_fallback() || envelope.fallbacks.is_empty() {
        return Err(primary_err);
    }

    for FallbackEntry { provider, model } in &envelope.fallbacks {
        match call(provider.clone(), model.clone()).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Failure(err) if err.blocks_fallback() => {
                tracing::warn!(provider = %provider, "fallback aborted: non-cascadable error");
                return Err(err);
            }
            Attempt::Failure(err) => {
                tracing::warn!(provider = %provider, model = %model, error = %err.error.message, "fallback attempt failed, trying next");
            }
        }
    }

    tracing::warn!(provider = %primary_provider, "all fallbacks exhausted, returning primary error");
    Err(primary_err.stamp_provider(primary_provider))
}

/// Builds the per-attempt envelope for a (provider, model) pair: same request
/// body, provider/model swapped to the attempt's target. Fallback entries are
/// tried in order, each with the model override specified in the entry.
pub(crate) fn envelope_for_attempt(
    base: &RequestEnvelope,
    provider: String,
    model: String,
) -> RequestEnvelope {
    let mut attempt = base.clone();
    attempt.provider = provider;
    attempt.model = model;
    attempt
}

/// Missing provider configuration on a fallback entry is a skip-with-warning,
/// not a cascade-aborting error: translate an `AccountError`-flavoured
/// `BifrostError` produced by `provider_runtime` into a non-blocking failure
/// so the cascade tries the next entry instead of stopping.
pub(crate) fn unconfigured_is_skippable(err: &BifrostError) -> bool {
    err.error.error_type.as_deref() == Some("provider_not_configured")
}
