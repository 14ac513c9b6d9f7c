use clap::Parser;

/// CLI args for the demo binary: composed here and handed to the engine as a
/// finished, typed config. This crate never reads config files directly; env
/// vars are picked up only through clap's `env` fallback on each field.
#[derive(Debug, Clone, Parser)]
#[command(name = "bifrost-demo", version, about = "Bifrost routing core demo")]
pub struct Cli {
    /// Worker count for the demo's single "echo" provider.
    #[arg(long, env = "BIFROST_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Provider queue capacity.
    #[arg(long, env = "BIFROST_BUFFER_SIZE", default_value_t = 64)]
    pub buffer_size: usize,

    /// Max retries per request before giving up.
    #[arg(long, env = "BIFROST_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    /// Drop requests instead of blocking when the queue is full.
    #[arg(long, env = "BIFROST_DROP_EXCESS")]
    pub drop_excess: bool,

    /// Run the streaming demo instead of the non-streaming one.
    #[arg(long)]
    pub stream: bool,

    /// Log filter, e.g. "info" or "bifrost_engine=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}
