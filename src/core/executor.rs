//! Inference execution abstraction used by the worker-backed gateway.

use async_trait::async_trait;

/// Runs one prompt to completion.
///
/// The executor is called from a dedicated worker thread that owns its own
/// single-threaded tokio runtime, so CPU/GPU-bound work never blocks the
/// scheduler's runtime.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use solar_llm_scheduler::core::InferenceExecutor;
///
/// #[derive(Clone)]
/// struct Shout;
///
/// #[async_trait]
/// impl InferenceExecutor for Shout {
///     async fn execute(&self, prompt: String) -> Result<String, String> {
///         Ok(prompt.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait InferenceExecutor: Send + Sync + Clone + 'static {
    /// Generate a response, or return an error message.
    async fn execute(&self, prompt: String) -> Result<String, String>;
}
