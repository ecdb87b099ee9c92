use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

/// 進行状況。percentage は 0〜100 を想定。
#[derive(Serialize, Clone, Debug)]
pub struct Progress {
    pub percentage: f64,
    pub achieved_points: Vec<String>,
    pub remaining_points: Vec<String>,
}

/// 生成済みセクション。一度 StoryContext に追加された後は変更しない。
#[derive(Serialize, Clone, Debug)]
pub struct SectionData {
    pub content: String,
    pub progress: Progress,
    pub next_preview: String,
    pub thinking: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct Character {
    pub name: String,
    pub role: String,
    pub personality: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct StoryBaseSettings {
    pub themes: Vec<String>,
    pub characters: Vec<Character>,
    pub world_setting: String,
    pub tone: String,
    pub thinking_process: String,
}

/// 計画見直しの結果。作成後は変更しない（監査ログとして履歴に残る）。
#[derive(Serialize, Clone, Debug)]
pub struct PlanAdjustment {
    pub timestamp: DateTime<Utc>,
    pub analysis: String,
    pub adjustments: String,
    pub future_plans: String,
    pub thinking_process: String,
}

/// 計画されたセクション。生成済みの SectionData とは別物。
#[derive(Serialize, Clone, Debug)]
pub struct StorySection {
    pub content: String,
    pub goals: String,
    pub adjusted_goals: Vec<String>,
}

impl StorySection {
    pub fn new(content: String, goals: String) -> Self {
        Self {
            content,
            goals,
            adjusted_goals: Vec::new(),
        }
    }

    /// 現在の目標を設定（上書き）。有効な目標は常に一つだけ。
    pub fn set_current_goals(&mut self, new_goals: &str) {
        if new_goals.is_empty() {
            self.adjusted_goals.clear();
        } else {
            self.adjusted_goals = vec![new_goals.to_string()];
        }
    }

    /// 現在の目標を取得。調整があれば最新のもの、なければ当初の目標。
    pub fn current_goals(&self) -> &str {
        self.adjusted_goals.last().map(String::as_str).unwrap_or(&self.goals)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct StoryPlan {
    pub outline: String,
    pub major_points: Vec<String>,
    pub sections: Vec<StorySection>,
    pub foreshadowing: Vec<String>,
    pub thinking_process: String,
    pub adjustments: Vec<PlanAdjustment>,
}

impl StoryPlan {
    /// 計画の調整を追加。履歴は追記のみで到着順を保つ。
    pub fn add_adjustment(&mut self, adjustment: PlanAdjustment) {
        self.apply_adjustment(&adjustment);
        self.adjustments.push(adjustment);
    }

    fn apply_adjustment(&mut self, adjustment: &PlanAdjustment) {
        // 最新セクションの今後の目標だけを上書きする。過去の内容には触れない。
        if let Some(section) = self.sections.last_mut() {
            section.set_current_goals(&adjustment.future_plans);
        }

        if !adjustment.adjustments.is_empty() {
            self.update_major_points(&adjustment.adjustments);
        }
    }

    fn update_major_points(&mut self, adjustments: &str) {
        // major_points は縮まない。既存を保ったまま新規だけ追加する。
        for line in adjustments.lines() {
            let point = line.trim();
            if point.is_empty() {
                continue;
            }
            if !self.major_points.iter().any(|p| p == point) {
                self.major_points.push(point.to_string());
            }
        }
    }

    pub fn latest_adjustment(&self) -> Option<&PlanAdjustment> {
        self.adjustments.last()
    }

    /// 次のセクション生成プロンプトが参照する現在の計画状態。
    pub fn current_plan_state(&self) -> serde_json::Value {
        json!({
            "outline": self.outline,
            "major_points": self.major_points,
            "sections": self.sections,
            "foreshadowing": self.foreshadowing,
            "thinking_process": self.thinking_process,
            "latest_adjustment": self.latest_adjustment(),
        })
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Initialized,
    SectionGenerated,
    Completed,
    Error,
}

/// メタデータスナップショット。状態遷移のたびに上書き保存される。
#[derive(Serialize, Clone, Debug)]
pub struct GenerationMetadata {
    pub status: GenerationStatus,
    pub current_section: usize,
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenerationMetadata {
    pub fn new(status: GenerationStatus, current_section: usize, progress: f64) -> Self {
        Self {
            status,
            current_section,
            progress,
            timestamp: Utc::now(),
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: String) -> Self {
        self.error_message = Some(message);
        self
    }
}

/// 一回の生成実行を通して共有される可変コンテキスト。
#[derive(Clone, Debug, Default)]
pub struct StoryContext {
    pub story_setting: String,
    pub total_length: String,
    pub base_settings: Option<StoryBaseSettings>,
    pub story_plan: Option<StoryPlan>,
    pub sections: Vec<SectionData>,
    pub progress: f64,
    pub current_length: usize,
}

impl StoryContext {
    pub fn new(story_setting: String, total_length: String) -> Self {
        Self {
            story_setting,
            total_length,
            ..Default::default()
        }
    }

    /// 現在の総文字数（文字単位、バイトではない）。
    pub fn current_length(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.content.chars().count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjustment(analysis: &str, adjustments: &str, future_plans: &str) -> PlanAdjustment {
        PlanAdjustment {
            timestamp: Utc::now(),
            analysis: analysis.to_string(),
            adjustments: adjustments.to_string(),
            future_plans: future_plans.to_string(),
            thinking_process: String::new(),
        }
    }

    fn plan_with_sections(n: usize) -> StoryPlan {
        StoryPlan {
            outline: "概要".to_string(),
            major_points: vec!["出会い".to_string()],
            sections: (0..n)
                .map(|i| StorySection::new(format!("内容{}", i), format!("目標{}", i)))
                .collect(),
            foreshadowing: vec![],
            thinking_process: String::new(),
            adjustments: vec![],
        }
    }

    #[test]
    fn test_add_adjustment_overwrites_current_goal() {
        let mut plan = plan_with_sections(2);

        plan.add_adjustment(adjustment("分析1", "", "新しい方針A"));
        assert_eq!(plan.sections[1].current_goals(), "新しい方針A");

        // 二度目の調整は追記ではなく置き換え
        plan.add_adjustment(adjustment("分析2", "", "新しい方針B"));
        assert_eq!(plan.sections[1].current_goals(), "新しい方針B");
        assert_eq!(plan.sections[1].adjusted_goals.len(), 1);

        // 過去のセクションの目標は変わらない
        assert_eq!(plan.sections[0].current_goals(), "目標0");
    }

    #[test]
    fn test_add_adjustment_dedupes_major_points() {
        let mut plan = plan_with_sections(1);

        plan.add_adjustment(adjustment("", "出会い\n対立の激化", ""));
        assert_eq!(plan.major_points, vec!["出会い", "対立の激化"]);

        // 同じ調整をもう一度適用しても重複しない
        plan.add_adjustment(adjustment("", "出会い\n対立の激化", ""));
        assert_eq!(plan.major_points, vec!["出会い", "対立の激化"]);
    }

    #[test]
    fn test_adjustment_history_is_append_only() {
        let mut plan = plan_with_sections(1);
        plan.add_adjustment(adjustment("一回目", "", "方針A"));
        plan.add_adjustment(adjustment("二回目", "", "方針B"));

        assert_eq!(plan.adjustments.len(), 2);
        assert_eq!(plan.adjustments[0].analysis, "一回目");
        assert_eq!(plan.latest_adjustment().unwrap().analysis, "二回目");
    }

    #[test]
    fn test_add_adjustment_without_sections() {
        let mut plan = plan_with_sections(0);
        plan.add_adjustment(adjustment("分析", "新展開", "方針"));

        assert_eq!(plan.adjustments.len(), 1);
        assert!(plan.major_points.contains(&"新展開".to_string()));
    }

    #[test]
    fn test_empty_future_plans_clears_override() {
        let mut section = StorySection::new("内容".to_string(), "当初の目標".to_string());
        section.set_current_goals("調整後の目標");
        assert_eq!(section.current_goals(), "調整後の目標");

        section.set_current_goals("");
        assert_eq!(section.current_goals(), "当初の目標");
    }

    #[test]
    fn test_current_length_counts_chars() {
        let mut ctx = StoryContext::new("設定".to_string(), "短編".to_string());
        ctx.sections.push(SectionData {
            content: "あいうえお".to_string(),
            progress: Progress {
                percentage: 10.0,
                achieved_points: vec![],
                remaining_points: vec![],
            },
            next_preview: String::new(),
            thinking: String::new(),
        });
        assert_eq!(ctx.current_length(), 5);
    }

    #[test]
    fn test_metadata_status_serializes_snake_case() {
        let meta = GenerationMetadata::new(GenerationStatus::SectionGenerated, 3, 40.0);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["status"], "section_generated");
        assert_eq!(value["current_section"], 3);
        assert!(value.get("error_message").is_none());
    }

    #[test]
    fn test_current_plan_state_includes_latest_adjustment() {
        let mut plan = plan_with_sections(1);
        assert!(plan.current_plan_state()["latest_adjustment"].is_null());

        plan.add_adjustment(adjustment("分析", "", "方針"));
        let state = plan.current_plan_state();
        assert_eq!(state["latest_adjustment"]["future_plans"], "方針");
        assert_eq!(state["outline"], "概要");
    }
}
