use std::sync::atomic::Ordering;
use std::time::Duration;

use bifrost_common::ConcurrencyAndBufferSize;
use bifrost_provider::BifrostError;

use crate::state::{provider_runtime, Engine};
use std::sync::Arc;

/// Bound on forwarding one buffered admission from the old queue into the new
/// one during a resize.
const TRANSFER_DEADLINE: Duration = Duration::from_secs(5);

/// How often `transfer_with_deadline` rechecks the new queue while waiting
/// for room.
const TRANSFER_POLL_INTERVAL: Duration = Duration::from_millis(10);

enum TransferOutcome {
    Sent,
    Closed(crate::state::Admission),
    TimedOut(crate::state::Admission),
}

/// Forwards `admission` into `new_tx`, retrying with `try_send` until either
/// it is accepted, the channel closes, or `deadline` elapses. Uses `try_send`
/// rather than the blocking `send` future so a deadline miss never loses
/// ownership of `admission`. Racing `send` against a timeout would drop the
/// in-flight send future, and the admission along with it, the moment the
/// timeout branch won.
async fn transfer_with_deadline(
    new_tx: &async_channel::Sender<crate::state::Admission>,
    mut admission: crate::state::Admission,
    deadline: Duration,
) -> TransferOutcome {
    let start = tokio::time::Instant::now();
    loop {
        admission = match new_tx.try_send(admission) {
            Ok(()) => return TransferOutcome::Sent,
            Err(async_channel::TrySendError::Closed(admission)) => {
                return TransferOutcome::Closed(admission)
            }
            Err(async_channel::TrySendError::Full(admission)) => admission,
        };
        if start.elapsed() >= deadline {
            return TransferOutcome::TimedOut(admission);
        }
        tokio::time::sleep(TRANSFER_POLL_INTERVAL.min(deadline)).await;
    }
}

/// Swaps a provider's queue/worker pool for one sized to `new_sizing` without
/// losing buffered or in-flight work. Only one transition per provider can
/// run at a time; callers serialize on the provider's write lock by virtue
/// of this function holding it for the whole sequence.
pub async fn update_provider_concurrency(
    engine: &Arc<Engine>,
    provider: &str,
    new_sizing: ConcurrencyAndBufferSize,
) -> Result<(), BifrostError> {
    new_sizing
        .validate()
        .map_err(|err| BifrostError::new(provider, err.to_string()).with_type("invalid_config"))?;

    let handle = provider_runtime(engine, provider).await?;
    let mut runtime = handle.write().await;

    let (new_tx, new_rx) = async_channel::bounded(new_sizing.buffer_size.max(1));
    let old_concurrency = runtime.concurrency;
    let mut transferred = 0usize;

    // Step 2: drain buffered admissions from the old queue into the new one.
    while let Ok(admission) = runtime.queue_rx.try_recv() {
        match transfer_with_deadline(&new_tx, admission, TRANSFER_DEADLINE).await {
            TransferOutcome::Sent => transferred += 1,
            TransferOutcome::Closed(admission) => {
                tracing::error!(provider, "new queue closed mid-transfer, dropping admission");
                deliver_transfer_failure(admission).await;
            }
            TransferOutcome::TimedOut(admission) => {
                tracing::warn!(provider, "transfer deadline exceeded, delivering error outcome");
                deliver_transfer_failure(admission).await;
            }
        }
    }

    // Step 3: close the old queue and swap it in.
    runtime.queue_tx.close();
    runtime.queue_rx.close();
    runtime.queue_tx = new_tx;
    runtime.queue_rx = new_rx;
    runtime.buffer_size = new_sizing.buffer_size;

    // Step 4: wait for every old worker to finish in-flight work and exit.
    let old_handles = std::mem::take(&mut runtime.worker_handles);
    for handle in old_handles {
        let _ = handle.await;
    }

    // Step 5: spawn the fresh worker pool against the new queue.
    let mut handles = Vec::with_capacity(new_sizing.concurrency);
    for _ in 0..new_sizing.concurrency {
        handles.push(crate::worker::spawn_worker(
            engine.clone(),
            provider.to_string(),
            runtime.queue_rx.clone(),
        ));
    }
    runtime.worker_handles = handles;
    runtime.concurrency = new_sizing.concurrency;

    engine
        .events()
        .emit(bifrost_provider::Event::Operational(
            bifrost_provider::OperationalEvent::ProviderReconfigured {
                provider: provider.to_string(),
                old_concurrency,
                new_concurrency: new_sizing.concurrency,
                transferred,
            },
        ))
        .await;

    Ok(())
}

/// Atomically flips the drop-excess flag for a provider without touching its
/// queue or workers.
pub async fn set_drop_excess(
    engine: &Arc<Engine>,
    provider: &str,
    drop_excess: bool,
) -> Result<(), BifrostError> {
    let handle = provider_runtime(engine, provider).await?;
    let runtime = handle.read().await;
    runtime.drop_excess.store(drop_excess, Ordering::Relaxed);
    Ok(())
}

async fn deliver_transfer_failure(admission: crate::state::Admission) {
    let _ = admission
        .error_tx
        .send(BifrostError::new(
            &admission.envelope.provider,
            "provider reconfiguration could not transfer this request",
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_common::{NetworkConfig, ProviderConfig, RequestKind};
    use bifrost_provider::{EventHub, Input, Params, ProviderRegistry, RequestEnvelope, StaticAccount};
    use tokio_util::sync::CancellationToken;

    fn dummy_admission() -> (crate::state::Admission, tokio::sync::mpsc::Receiver<BifrostError>) {
        let (result_tx, _result_rx) = tokio::sync::mpsc::channel(1);
        let (error_tx, error_rx) = tokio::sync::mpsc::channel(1);
        let (stream_tx, _stream_rx) = tokio::sync::mpsc::channel(1);
        let admission = crate::state::Admission {
            envelope: RequestEnvelope {
                provider: "mock".into(),
                model: "m".into(),
                input: Input::ChatCompletion(serde_json::json!({})),
                params: Params::default(),
                fallbacks: vec![],
            },
            kind: RequestKind::ChatCompletion,
            cancellation: CancellationToken::new(),
            trace_id: "t".into(),
            result_tx,
            error_tx,
            stream_tx,
            post_hook: None,
        };
        (admission, error_rx)
    }

    fn config(concurrency: usize, buffer_size: usize) -> ProviderConfig {
        ProviderConfig {
            concurrency_and_buffer_size: ConcurrencyAndBufferSize {
                concurrency,
                buffer_size,
            },
            network_config: NetworkConfig::default(),
            keyless: true,
            drop_excess_requests: false,
            metadata: serde_json::Value::Null,
        }
    }

    async fn engine() -> Arc<Engine> {
        let account = StaticAccount::new();
        account.set_provider("mock", config(1, 4), vec![]).await;
        Engine::new(
            Arc::new(account),
            Arc::new(ProviderRegistry::new()),
            EventHub::new(64),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn resize_preserves_buffer_capacity_and_worker_count() {
        let engine = engine().await;
        provider_runtime(&engine, "mock").await.unwrap();

        update_provider_concurrency(
            &engine,
            "mock",
            ConcurrencyAndBufferSize {
                concurrency: 3,
                buffer_size: 10,
            },
        )
        .await
        .unwrap();

        let handle = provider_runtime(&engine, "mock").await.unwrap();
        let runtime = handle.read().await;
        assert_eq!(runtime.concurrency, 3);
        assert_eq!(runtime.buffer_size, 10);
        assert_eq!(runtime.worker_handles.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_timeout_delivers_error_instead_of_hanging() {
        let (new_tx, _new_rx) = async_channel::bounded(1);
        let (filler, _filler_errors) = dummy_admission();
        new_tx.try_send(filler).unwrap();

        let (admission, mut error_rx) = dummy_admission();
        let deadline = Duration::from_millis(50);
        let outcome =
            tokio::time::timeout(Duration::from_secs(1), transfer_with_deadline(&new_tx, admission, deadline))
                .await
                .expect("transfer_with_deadline must itself return once the deadline elapses");

        let admission = match outcome {
            TransferOutcome::TimedOut(admission) => admission,
            TransferOutcome::Sent => panic!("new queue was full, must not report Sent"),
            TransferOutcome::Closed(_) => panic!("new queue was never closed"),
        };
        deliver_transfer_failure(admission).await;

        let err = error_rx.recv().await.expect("abandoned caller must receive an error");
        assert!(!err.error.message.is_empty());
    }
}
