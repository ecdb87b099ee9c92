use anyhow::{Context, Result};
use chrono::{Local, Utc};
use log::info;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::parser;

/// LLM とのやり取りを記録するログ群。
/// 生ログと思考プロセスログは追記専用、構造化ログは JSONL。
pub struct LogManager {
    raw_log_file: PathBuf,
    thinking_file: PathBuf,
    structured_log_file: PathBuf,
}

impl LogManager {
    pub fn new(output_dir: &Path) -> Result<Self> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)
                .with_context(|| format!("出力ディレクトリの作成に失敗: {}", output_dir.display()))?;
            info!("出力ディレクトリを作成しました: {}", output_dir.display());
        }

        let manager = Self {
            raw_log_file: output_dir.join("raw_llm_output.log"),
            thinking_file: output_dir.join("thinking_process.txt"),
            structured_log_file: output_dir.join("generation_log.jsonl"),
        };
        manager.initialize_logs()?;
        Ok(manager)
    }

    fn initialize_logs(&self) -> Result<()> {
        fs::write(&self.raw_log_file, "=== LLM Raw Output Log ===\n\n")?;
        fs::write(&self.thinking_file, "=== 思考プロセスログ ===\n\n")?;
        Ok(())
    }

    fn append(path: &Path, content: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn log_thinking_process(&self, phase: &str, thinking: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let content = format!(
            "\n=== {} ===\nTimestamp: {}\n\n思考プロセス:\n{}\n\n{}\n",
            phase,
            timestamp,
            thinking,
            "=".repeat(50)
        );
        Self::append(&self.thinking_file, &content)
    }

    /// 一回のサービス呼び出しを丸ごと記録する。応答に思考プロセスが
    /// 含まれていれば併せて思考ログにも残す。
    pub fn log_llm_interaction(&self, phase: &str, prompt: &str, response: &str) -> Result<()> {
        let thinking = parser::extract_tag_content(response, "thinking");
        if !thinking.is_empty() {
            self.log_thinking_process(phase, &thinking)?;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let content = format!(
            "\n=== {} ===\nTimestamp: {}\n\n--- Prompt ---\n{}\n\n--- Response ---\n{}\n\n{}\n",
            phase,
            timestamp,
            prompt,
            response,
            "=".repeat(50)
        );
        Self::append(&self.raw_log_file, &content)
    }

    pub fn log_structured_data(&self, phase: &str, data: serde_json::Value) -> Result<()> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "phase": phase,
            "data": data,
        });
        Self::append(&self.structured_log_file, &format!("{}\n", entry))
    }
}
