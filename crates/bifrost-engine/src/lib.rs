pub mod dispatcher;
pub mod fallback;
pub mod pipeline;
pub mod pool;
pub mod reconfigure;
pub mod retry;
pub mod state;
pub mod tools;
pub mod worker;

pub use dispatcher::{DispatchError, DispatchRequest, Dispatcher};
pub use reconfigure::{set_drop_excess, update_provider_concurrency};
pub use state::{Engine, EngineConfig};
pub use tools::{InMemoryToolServerManager, ToolClientConfig, ToolManagerError, ToolServerManager};
