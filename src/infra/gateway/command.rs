//! Inference executor that shells out to an external program.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CommandGatewayConfig;
use crate::core::InferenceExecutor;

/// End-of-output markers some local runners print.
const END_MARKERS: [&str; 2] = ["<end>", "<eos>"];

/// Runs `program [args..] <prompt>` and returns its cleaned stdout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExecutor {
    /// Build from configuration.
    pub fn new(config: CommandGatewayConfig) -> Self {
        Self {
            program: config.program,
            args: config.args,
        }
    }
}

/// Strip an echoed prompt and end markers from raw model output.
pub fn clean_output(raw: &str, prompt: &str) -> String {
    let mut text = raw.trim();
    let prompt = prompt.trim();
    if !prompt.is_empty() {
        if let Some(rest) = text.strip_prefix(prompt) {
            text = rest;
        }
    }
    let mut cleaned = text.to_string();
    for marker in END_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned.trim().to_string()
}

#[async_trait]
impl InferenceExecutor for CommandExecutor {
    async fn execute(&self, prompt: String) -> Result<String, String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&prompt)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(clean_output(&String::from_utf8_lossy(&output.stdout), &prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output_strips_prompt_and_markers() {
        assert_eq!(clean_output("What is 2+2? 4 <eos>\n", "What is 2+2?"), "4");
        assert_eq!(clean_output("  answer<end>", "question"), "answer");
        assert_eq!(clean_output("plain", ""), "plain");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executes_program() {
        let executor = CommandExecutor::new(CommandGatewayConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "printf '%s and more <eos>' \"$0\"".into()],
        });
        assert_eq!(executor.execute("hello".into()).await.unwrap(), "and more");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let executor = CommandExecutor::new(CommandGatewayConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo broken >&2; exit 3".into()],
        });
        let err = executor.execute("hello".into()).await.unwrap_err();
        assert!(err.contains("broken"));
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let executor = CommandExecutor::new(CommandGatewayConfig {
            program: PathBuf::from("/definitely/not/a/program"),
            args: Vec::new(),
        });
        assert!(executor.execute("hello".into()).await.is_err());
    }
}
