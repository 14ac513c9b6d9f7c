mod cli;
mod echo_provider;

use std::sync::Arc;

use clap::Parser;

use bifrost_common::{ConcurrencyAndBufferSize, NetworkConfig, ProviderConfig};
use bifrost_engine::{DispatchRequest, Dispatcher, Engine, EngineConfig};
use bifrost_provider::{EventHub, Input, ProviderRegistry, RequestEnvelope, StaticAccount, TerminalEventSink};

use echo_provider::EchoProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .init();

    let account = StaticAccount::new();
    account
        .set_provider(
            "echo",
            ProviderConfig {
                concurrency_and_buffer_size: ConcurrencyAndBufferSize {
                    concurrency: cli.concurrency,
                    buffer_size: cli.buffer_size,
                },
                network_config: NetworkConfig {
                    max_retries: cli.max_retries,
                    ..NetworkConfig::default()
                },
                keyless: true,
                drop_excess_requests: cli.drop_excess,
                metadata: serde_json::Value::Null,
            },
            vec![],
        )
        .await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(EchoProvider));

    let events = EventHub::new(256);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;

    let engine = Engine::new(
        Arc::new(account),
        Arc::new(registry),
        events,
        EngineConfig::default(),
    );
    let dispatcher = Dispatcher::new(engine);

    let envelope = RequestEnvelope {
        provider: "echo".into(),
        model: "demo-model".into(),
        input: Input::ChatCompletion(serde_json::json!({
            "messages": [{"role": "user", "content": "hello, bifrost"}],
        })),
        params: Default::default(),
        fallbacks: vec![],
    };

    if cli.stream {
        let mut stream = dispatcher
            .chat_completion_stream(DispatchRequest::new(envelope))
            .await
            .map_err(|err| anyhow::anyhow!("streaming chat completion failed: {}", err.error.message))?;
        while let Some(element) = stream.recv().await {
            println!("{}", serde_json::to_string(&element)?);
        }
    } else {
        let response = dispatcher
            .chat_completion(DispatchRequest::new(envelope))
            .await
            .map_err(|err| anyhow::anyhow!("chat completion failed: {}", err.error.message))?;
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }

    Ok(())
}
