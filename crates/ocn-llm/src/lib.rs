pub mod anthropic;
pub(crate) mod sse;
pub(crate) mod util;

pub use anthropic::AnthropicClient;
