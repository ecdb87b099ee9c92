use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;

use crate::llm::LlmClient;
use crate::logs::LogManager;
use crate::models::{PlanAdjustment, SectionData, StoryContext};
use crate::parser;
use crate::prompts::PromptManager;

pub const DEFAULT_MAX_RETRIES: usize = 3;

/// セクション生成の実行役。コンテキストは呼び出しごとに借用し、
/// 計画の調整だけを書き込む。生成済みセクションの追加は呼び出し側が行う。
pub struct SectionManager<'a> {
    llm: &'a dyn LlmClient,
    log_manager: &'a LogManager,
    prompt_manager: &'a PromptManager,
    max_retries: usize,
}

impl<'a> SectionManager<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        log_manager: &'a LogManager,
        prompt_manager: &'a PromptManager,
    ) -> Self {
        Self {
            llm,
            log_manager,
            prompt_manager,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 一つのセクションを生成する。試行はリトライ上限まで、
    /// 使い切ったら最後のエラーを添えて失敗する。
    pub async fn generate_section(
        &self,
        context: &mut StoryContext,
        section_count: usize,
    ) -> Result<SectionData> {
        // 5セクションごとの計画見直し。見直しの失敗はリトライせず伝播する。
        if section_count > 0 && section_count % 5 == 0 {
            self.review_plan(context, section_count).await?;
        }

        let prompt = self
            .prompt_manager
            .section_generation_prompt(context, section_count)?;

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            match self.attempt_section(&prompt, section_count, attempt).await {
                Ok(section_data) => {
                    info!(
                        "セクション {} の生成が完了（進行度: {}%）",
                        section_count, section_data.progress.percentage
                    );
                    return Ok(section_data);
                }
                Err(e) => {
                    warn!(
                        "セクション {} の生成が失敗（試行 {}/{}）: {}",
                        section_count, attempt, self.max_retries, e
                    );
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        info!("リトライを実行します...");
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| anyhow!("不明なエラー"));
        let error_msg = format!(
            "セクション {} の生成に失敗しました。{}回の試行全てが失敗: {}",
            section_count, self.max_retries, last_error
        );
        error!("{}", error_msg);
        Err(anyhow!(error_msg))
    }

    async fn attempt_section(
        &self,
        prompt: &str,
        section_count: usize,
        attempt: usize,
    ) -> Result<SectionData> {
        let response = self.llm.generate(prompt).await?;
        self.log_manager.log_llm_interaction(
            &format!(
                "セクション {} 生成（試行 {}/{}）",
                section_count, attempt, self.max_retries
            ),
            prompt,
            &response,
        )?;

        let thinking = parser::extract_tag_content(&response, "thinking");
        let section_data = parser::parse_section_data(&response, &thinking);

        Self::quality_check(&section_data)?;
        Ok(section_data)
    }

    /// 受け入れ前の品質ゲート。満たさない場合はエラーでリトライに回す。
    fn quality_check(section_data: &SectionData) -> Result<()> {
        if section_data.content.is_empty() || section_data.next_preview.is_empty() {
            bail!("生成されたセクションが品質基準を満たしていません: 必要な要素が不足しています");
        }

        if section_data.content.chars().count() < 1000 {
            bail!("生成されたセクションが品質基準を満たしていません: セクションの長さが不足しています");
        }

        let percentage = section_data.progress.percentage;
        if !(0.0..=100.0).contains(&percentage) {
            bail!("生成されたセクションが品質基準を満たしていません: 進行度の値が不適切です");
        }

        Ok(())
    }

    /// 計画の見直しを実行し、結果をコンテキストの計画に反映する。
    async fn review_plan(&self, context: &mut StoryContext, section_count: usize) -> Result<()> {
        info!("計画見直しを開始（セクション {}）", section_count);

        let prompt = self.prompt_manager.plan_review_prompt(context, section_count)?;

        let response = self
            .llm
            .generate(&prompt)
            .await
            .with_context(|| format!("計画見直し中にエラー（セクション {}）", section_count))?;
        self.log_manager.log_llm_interaction(
            &format!("計画見直し（セクション {}）", section_count),
            &prompt,
            &response,
        )?;

        let review = parser::parse_plan_review(&response);

        let adjustment = PlanAdjustment {
            timestamp: Utc::now(),
            analysis: review.analysis,
            adjustments: review.adjustments,
            future_plans: review.future_plans,
            thinking_process: review.thinking_process,
        };

        let plan = context
            .story_plan
            .as_mut()
            .context("展開計画が初期化されていません")?;
        plan.add_adjustment(adjustment.clone());

        self.log_manager.log_structured_data(
            "plan_review",
            json!({
                "section": section_count,
                "adjustment": adjustment,
            }),
        )?;

        info!("計画見直しが完了し、更新を適用しました（セクション {}）", section_count);
        Ok(())
    }
}
