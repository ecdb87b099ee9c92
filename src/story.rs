use anyhow::{Context, Result};
use log::{error, info};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::logs::LogManager;
use crate::models::{
    GenerationMetadata, GenerationStatus, StoryBaseSettings, StoryContext, StoryPlan,
};
use crate::parser;
use crate::prompts::PromptManager;
use crate::section::SectionManager;

/// 物語生成全体の統括。コンテキストと出力ファイルを所有し、
/// セクションループを完了・上限・エラーまで回す。
pub struct StoryManager {
    config: Config,
    llm: Box<dyn LlmClient>,
    log_manager: LogManager,
    prompt_manager: PromptManager,
    story_context: StoryContext,
    story_file: PathBuf,
    metadata_file: PathBuf,
}

impl StoryManager {
    pub fn new(config: Config, llm: Box<dyn LlmClient>) -> Result<Self> {
        let output_dir = Path::new("output").join(&config.output_dir);
        Self::with_output_dir(config, llm, &output_dir)
    }

    pub fn with_output_dir(
        config: Config,
        llm: Box<dyn LlmClient>,
        output_dir: &Path,
    ) -> Result<Self> {
        let log_manager = LogManager::new(output_dir)?;

        let story_context =
            StoryContext::new(config.story_setting.clone(), String::new());

        let manager = Self {
            config,
            llm,
            log_manager,
            prompt_manager: PromptManager::new(),
            story_context,
            story_file: output_dir.join("story.txt"),
            metadata_file: output_dir.join("metadata.json"),
        };
        manager.initialize_files()?;
        Ok(manager)
    }

    fn initialize_files(&self) -> Result<()> {
        fs::write(&self.story_file, "=== 物語 ===\n\n")
            .with_context(|| format!("物語ファイルの初期化に失敗: {}", self.story_file.display()))?;
        info!("物語ファイルを初期化: {}", self.story_file.display());

        self.save_metadata(GenerationMetadata::new(GenerationStatus::Initialized, 0, 0.0))
    }

    fn save_metadata(&self, metadata: GenerationMetadata) -> Result<()> {
        let mut value = serde_json::to_value(&metadata)?;
        value["current_length"] = serde_json::json!(self.current_length());

        fs::write(&self.metadata_file, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("メタデータの保存に失敗: {}", self.metadata_file.display()))
    }

    fn append_story(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.story_file)?;
        file.write_all(content.trim().as_bytes())?;
        file.write_all(b"\n\n")?;
        Ok(())
    }

    /// 現在の総文字数を取得。
    pub fn current_length(&self) -> usize {
        self.story_context.current_length()
    }

    async fn generate_base_settings(&self, total_length: &str) -> Result<StoryBaseSettings> {
        info!("基本設定の生成を開始");
        let prompt = self
            .prompt_manager
            .base_settings_prompt(&self.story_context.story_setting, total_length)?;

        let response = self
            .llm
            .generate(&prompt)
            .await
            .context("基本設定の生成中にエラー")?;
        self.log_manager.log_llm_interaction("基本設定生成", &prompt, &response)?;

        let base_settings = parser::parse_base_settings(&response);
        info!("基本設定の生成が完了");
        Ok(base_settings)
    }

    async fn generate_story_plan(&self, base_settings: &StoryBaseSettings) -> Result<StoryPlan> {
        info!("展開計画の生成を開始");
        let prompt = self
            .prompt_manager
            .story_plan_prompt(base_settings, &self.story_context.story_setting)?;

        let response = self
            .llm
            .generate(&prompt)
            .await
            .context("展開計画の生成中にエラー")?;
        self.log_manager.log_llm_interaction("展開計画生成", &prompt, &response)?;

        let story_plan = parser::parse_story_plan(&response);
        info!("展開計画の生成が完了");
        Ok(story_plan)
    }

    /// 物語の初期化。基本設定と展開計画を一度ずつ生成する。
    /// この段階の失敗はリトライせず実行全体を中断する。
    pub async fn initialize_story(&mut self, total_length: &str) -> Result<()> {
        info!("=== 物語の初期化を開始 ===");

        self.story_context = StoryContext::new(
            self.config.story_setting.clone(),
            total_length.to_string(),
        );

        let base_settings = self.generate_base_settings(total_length).await?;
        let story_plan = self.generate_story_plan(&base_settings).await?;
        self.story_context.base_settings = Some(base_settings);
        self.story_context.story_plan = Some(story_plan);

        self.save_metadata(GenerationMetadata::new(GenerationStatus::Initialized, 0, 0.0))?;

        info!("=== 物語の初期化が完了 ===");
        Ok(())
    }

    /// 物語全体を生成する。完了（進行度 100 以上）か上限到達で止まり、
    /// 蓄積された物語本文を返す。
    pub async fn generate_full_story(
        &mut self,
        max_sections: usize,
        total_length: &str,
    ) -> Result<String> {
        info!("=== 物語生成開始 ===");

        self.initialize_story(total_length).await?;

        for section_count in 1..=max_sections {
            info!("セクション {} の生成を開始", section_count);

            let result = {
                let section_manager = SectionManager::new(
                    self.llm.as_ref(),
                    &self.log_manager,
                    &self.prompt_manager,
                );
                section_manager
                    .generate_section(&mut self.story_context, section_count)
                    .await
            };

            match result {
                Ok(section_data) => {
                    let percentage = section_data.progress.percentage;
                    self.append_story(&section_data.content)?;
                    self.story_context.progress = percentage;
                    self.story_context.sections.push(section_data);
                    self.story_context.current_length = self.current_length();

                    self.save_metadata(GenerationMetadata::new(
                        GenerationStatus::SectionGenerated,
                        section_count,
                        percentage,
                    ))?;

                    info!(
                        "セクション {} 完了: 現在の文字数 {}文字",
                        section_count,
                        self.current_length()
                    );

                    if percentage >= 100.0 {
                        info!("=== 物語が完結しました ===");
                        self.save_metadata(GenerationMetadata::new(
                            GenerationStatus::Completed,
                            section_count,
                            100.0,
                        ))?;
                        break;
                    }
                }
                Err(e) => {
                    error!("セクション {} の生成中にエラー: {}", section_count, e);
                    self.save_metadata(
                        GenerationMetadata::new(GenerationStatus::Error, section_count, 0.0)
                            .with_error(format!("{:#}", e)),
                    )?;
                    return Err(e);
                }
            }
        }

        fs::read_to_string(&self.story_file)
            .with_context(|| format!("物語ファイルの読み込みに失敗: {}", self.story_file.display()))
    }
}
