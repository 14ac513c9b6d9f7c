pub mod config;
pub mod kind;

pub use config::{
    BackoffConfig, ConcurrencyAndBufferSize, NetworkConfig, ProviderConfig, ProviderConfigError,
};
pub use kind::RequestKind;
