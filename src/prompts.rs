use std::collections::HashMap;

use log::info;
use regex::Regex;
use serde_json::json;
use thiserror::Error;

use crate::models::{StoryBaseSettings, StoryContext};

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("テンプレート '{0}' が見つかりません")]
    TemplateNotFound(String),

    #[error("テンプレート '{0}' は既に存在します")]
    TemplateAlreadyExists(String),

    #[error("テンプレート '{template}' に必須パラメータ '{parameter}' が不足しています")]
    RequiredParameterMissing { parameter: String, template: String },

    #[error("テンプレート '{template}' のフォーマットに問題があります: {reason}")]
    Format { template: String, reason: String },
}

const BASE_SETTINGS_TEMPLATE: &str = r#"あなたは小説家です。以下の設定に基づいて、物語の基本設定を考えてください。

重要: 必ず以下の順序で回答を構築してください。各ステップは必須です：

1. まず<thinking>タグ内で、物語の方向性について具体的に考察を記述してください。
2. 次に、その思考プロセスに基づいて、<story_base>タグ内に具体的な設定を記述してください。

ユーザーからの依頼内容：
{story_setting}

想定の長さ：{total_length}

<thinking>
物語の基本設定について、以下の点を具体的に考察します：

1. 物語のテーマ：
   [選定した2-3個のテーマとその理由を具体的に記述]

2. キャラクター構成：
   [主要キャラクターの設定根拠とその狙いを具体的に記述]

3. 世界観とトーン：
   [選択した世界観・トーンの意図と期待される効果を具体的に記述]
</thinking>

<story_base>
<themes>
[上記の思考プロセスで選定したテーマを箇条書きで記述]
</themes>

<characters>
<character>
<name>[キャラクター名]</name>
<role>[役割]</role>
<personality>[性格・特徴]</personality>
</character>
[必要に応じて追加のキャラクター]
</characters>

<world_setting>[世界観の詳細]</world_setting>
<tone>[物語全体のトーンや雰囲気]</tone>
</story_base>"#;

const STORY_PLAN_TEMPLATE: &str = r#"以下の基本設定に基づいて、物語の展開計画を立ててください。

重要: 必ず以下の順序で回答を構築してください：

1. まず<thinking>タグ内で、展開計画の方針について具体的に考察を記述してください。
2. 次に、その思考プロセスに基づいて、<story_plan>タグ内に具体的な計画を記述してください。

ユーザーからの依頼内容：
{story_setting}

基本設定：
{base_settings}

<thinking>
展開計画について、以下の点を具体的に考察します：

1. 物語構造：
   [選択した物語構造とその理由を具体的に記述]

2. 重要な転換点：
   [主要な転換点の配置とその意図を具体的に記述]

3. 伏線計画：
   [伏線の配置計画とその回収方針を具体的に記述]

4. 展開の緩急：
   [テンポの設計と読者への効果を具体的に記述]
</thinking>

<story_plan>
<outline>[物語の概要：上記の思考プロセスを反映]</outline>

<major_points>
<point>[重要な展開点とその位置付け]</point>
[必要に応じて追加の展開点]
</major_points>

<sections>
<section>
<content>内容の概要</content>
<goals>達成すべき要素</goals>
</section>
[必要に応じて追加のセクション]
</sections>

<foreshadowing>
<element>[伏線要素と回収計画]</element>
[必要に応じて追加の伏線要素]
</foreshadowing>
</story_plan>"#;

const SECTION_GENERATION_TEMPLATE: &str = r#"以下の情報に基づいて、物語の次のセクションを書いてください。

重要: 必ず以下の順序で回答を構築してください：

1. まず<thinking>タグ内で、このセクションの執筆方針について具体的に考察を記述してください。
2. 次に、その思考プロセスに基づいて、<section>タグ内に具体的な内容を記述してください。

ユーザーからの依頼内容：
{story_setting}

基本設定：
{base_settings}

展開計画：
{story_plan}

これまでの内容：
{current_content}
{plan_adjustments}
想定の長さ：{total_length}
現在の文字数：{current_length}文字

<thinking>
このセクションについて、以下の点を具体的に考察します：

1. 展開方針：
   [このセクションでの展開内容とその意図を具体的に記述]

2. キャラクターの動き：
   [登場するキャラクターの行動理由と狙いを具体的に記述]

3. 前セクションからの接続：
   [前セクションからの展開の自然さと工夫を具体的に記述]

4. 伏線の扱い：
   [このセクションでの伏線の配置または回収方針を具体的に記述]
</thinking>

<section>
    <content>
[上記の思考プロセスに基づいて、セクションの本文を記述。
プレーンテキストで、設定等は含めない。
100行4000字程度で記述
**短い場合もう一度書くことになるので絶対に絶対に絶対に守ってください。20行とか許されません**]
    </content>

    <progress>
        <percentage>[物語全体の進行度（0-100）]</percentage>

        <achieved_points>
        [このセクションで達成した要素を箇条書きで記述]
        </achieved_points>

        <remaining_points>
        [今後達成すべき要素を箇条書きで記述]
        </remaining_points>
    </progress>

<next_preview>[次のセクションでの展開予定]</next_preview>
</section>"#;

const PLAN_REVIEW_TEMPLATE: &str = r#"現在の進行状況に基づいて、計画の見直しを行ってください。

重要: 必ず以下の順序で回答を構築してください：

1. まず<thinking>タグ内で、計画の見直しポイントについて具体的に考察を記述してください。
2. 次に、その思考プロセスに基づいて、<plan_review>タグ内に具体的な見直し内容を記述してください。

ユーザーからの依頼内容：
{story_setting}

基本設定：
{base_settings}

現在の計画：
{story_plan}

現在の状況：
- セクション数: {section_count}
- これまでの内容: {current_content}

文字数の状況：
{length_info}

<thinking>
計画の見直しについて、以下の点を具体的に考察します：

1. 現状分析：
   [現在までの展開の評価と課題を具体的に記述]

2. 計画との差異：
   [当初の計画との違いとその理由を具体的に記述]

3. 調整の必要性：
   [必要な調整の内容と理由を具体的に記述]

4. 今後の方針：
   [調整を踏まえた今後の展開方針を具体的に記述]
</thinking>

<plan_review>
<analysis>[現状の詳細な分析]</analysis>
<adjustments>[必要な調整事項の具体的な内容]</adjustments>
<future_plans>[調整後の具体的な展開方針]</future_plans>
</plan_review>"#;

/// プロンプトテンプレートの管理。
pub struct PromptManager {
    templates: HashMap<String, String>,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptManager {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert("base_settings".to_string(), BASE_SETTINGS_TEMPLATE.to_string());
        templates.insert("story_plan".to_string(), STORY_PLAN_TEMPLATE.to_string());
        templates.insert(
            "section_generation".to_string(),
            SECTION_GENERATION_TEMPLATE.to_string(),
        );
        templates.insert("plan_review".to_string(), PLAN_REVIEW_TEMPLATE.to_string());
        Self { templates }
    }

    fn template(&self, name: &str) -> Result<&str, PromptError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PromptError::TemplateNotFound(name.to_string()))
    }

    fn validate_required_params(
        template_name: &str,
        params: &[(&str, String)],
        required: &[&str],
    ) -> Result<(), PromptError> {
        for name in required {
            let present = params
                .iter()
                .any(|(key, value)| key == name && !value.is_empty());
            if !present {
                return Err(PromptError::RequiredParameterMissing {
                    parameter: name.to_string(),
                    template: template_name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn format_template(
        template_name: &str,
        template: &str,
        params: &[(&str, String)],
    ) -> Result<String, PromptError> {
        // 一回の走査で置換する。埋め込んだ値は再走査しない。
        let placeholder = Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder pattern");

        let mut unresolved = None;
        let result = placeholder.replace_all(template, |caps: &regex::Captures| {
            match params.iter().find(|(key, _)| *key == &caps[1]) {
                Some((_, value)) => value.clone(),
                None => {
                    unresolved.get_or_insert_with(|| caps[0].to_string());
                    String::new()
                }
            }
        });

        if let Some(name) = unresolved {
            return Err(PromptError::Format {
                template: template_name.to_string(),
                reason: format!("未解決のプレースホルダ: {}", name),
            });
        }

        Ok(result.into_owned())
    }

    fn to_pretty_json<T: serde::Serialize>(
        template_name: &str,
        value: &T,
    ) -> Result<String, PromptError> {
        serde_json::to_string_pretty(value).map_err(|e| PromptError::Format {
            template: template_name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn base_settings_prompt(
        &self,
        story_setting: &str,
        total_length: &str,
    ) -> Result<String, PromptError> {
        let template_name = "base_settings";
        let template = self.template(template_name)?;

        let params = [
            ("story_setting", story_setting.to_string()),
            ("total_length", total_length.to_string()),
        ];
        Self::validate_required_params(template_name, &params, &["story_setting", "total_length"])?;
        Self::format_template(template_name, template, &params)
    }

    pub fn story_plan_prompt(
        &self,
        base_settings: &StoryBaseSettings,
        story_setting: &str,
    ) -> Result<String, PromptError> {
        let template_name = "story_plan";
        let template = self.template(template_name)?;

        let params = [
            ("story_setting", story_setting.to_string()),
            ("base_settings", Self::to_pretty_json(template_name, base_settings)?),
        ];
        Self::validate_required_params(template_name, &params, &["story_setting", "base_settings"])?;
        Self::format_template(template_name, template, &params)
    }

    /// セクション生成用プロンプト。最新の計画調整を反映する。
    pub fn section_generation_prompt(
        &self,
        context: &StoryContext,
        section_count: usize,
    ) -> Result<String, PromptError> {
        let template_name = "section_generation";
        let template = self.template(template_name)?;

        let missing = |parameter: &str| PromptError::RequiredParameterMissing {
            parameter: parameter.to_string(),
            template: template_name.to_string(),
        };
        let base_settings = context.base_settings.as_ref().ok_or_else(|| missing("base_settings"))?;
        let story_plan = context.story_plan.as_ref().ok_or_else(|| missing("story_plan"))?;

        let current_content = context
            .sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let current_length = context.current_length();

        let adjustment_info = match story_plan.latest_adjustment() {
            Some(adj) => format!(
                "\n直近の計画調整:\n- 分析: {}\n- 調整内容: {}\n- 今後の展開方針: {}\n",
                adj.analysis, adj.adjustments, adj.future_plans
            ),
            None => String::new(),
        };

        let params = [
            ("story_setting", context.story_setting.clone()),
            ("base_settings", Self::to_pretty_json(template_name, base_settings)?),
            (
                "story_plan",
                Self::to_pretty_json(template_name, &story_plan.current_plan_state())?,
            ),
            ("current_content", current_content),
            ("section_number", section_count.to_string()),
            ("current_length", current_length.to_string()),
            ("total_length", context.total_length.clone()),
            ("plan_adjustments", adjustment_info),
        ];
        Self::validate_required_params(
            template_name,
            &params,
            &["base_settings", "story_plan", "section_number", "total_length"],
        )?;
        Self::format_template(template_name, template, &params)
    }

    pub fn plan_review_prompt(
        &self,
        context: &StoryContext,
        section_count: usize,
    ) -> Result<String, PromptError> {
        let template_name = "plan_review";
        let template = self.template(template_name)?;

        let missing = |parameter: &str| PromptError::RequiredParameterMissing {
            parameter: parameter.to_string(),
            template: template_name.to_string(),
        };
        let base_settings = context.base_settings.as_ref().ok_or_else(|| missing("base_settings"))?;
        let story_plan = context.story_plan.as_ref().ok_or_else(|| missing("story_plan"))?;

        let current_content = Self::content_summary(context);
        let current_length = context.current_length();

        let length_info = json!({
            "current_length": current_length,
            "total_length_setting": context.total_length,
            "sections_completed": context.sections.len(),
            "average_section_length": if context.sections.is_empty() {
                0.0
            } else {
                current_length as f64 / context.sections.len() as f64
            },
        });

        let params = [
            ("story_setting", context.story_setting.clone()),
            ("base_settings", Self::to_pretty_json(template_name, base_settings)?),
            ("story_plan", Self::to_pretty_json(template_name, story_plan)?),
            ("section_count", section_count.to_string()),
            ("current_content", current_content),
            ("length_info", Self::to_pretty_json(template_name, &length_info)?),
        ];
        Self::validate_required_params(
            template_name,
            &params,
            &["base_settings", "story_plan", "section_count", "current_content", "length_info"],
        )?;
        Self::format_template(template_name, template, &params)
    }

    /// 直近3セクションの要約。各セクションは先頭200文字のみ。
    fn content_summary(context: &StoryContext) -> String {
        let sections = &context.sections;
        let recent = sections.len().saturating_sub(3);

        sections[recent..]
            .iter()
            .enumerate()
            .map(|(i, section)| {
                let section_num = recent + i + 1;
                let preview: String = section.content.chars().take(200).collect();
                format!("セクション{}:\n{}...", section_num, preview)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn add_template(&mut self, name: &str, template: &str) -> Result<(), PromptError> {
        if self.templates.contains_key(name) {
            return Err(PromptError::TemplateAlreadyExists(name.to_string()));
        }
        self.templates.insert(name.to_string(), template.to_string());
        info!("新しいテンプレート '{}' を追加しました", name);
        Ok(())
    }

    pub fn update_template(&mut self, name: &str, template: &str) -> Result<(), PromptError> {
        if !self.templates.contains_key(name) {
            return Err(PromptError::TemplateNotFound(name.to_string()));
        }
        self.templates.insert(name.to_string(), template.to_string());
        info!("テンプレート '{}' を更新しました", name);
        Ok(())
    }
}
