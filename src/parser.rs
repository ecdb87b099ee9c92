use log::{debug, warn};
use regex::Regex;

use crate::models::{
    Character, Progress, SectionData, StoryBaseSettings, StoryPlan, StorySection,
};

const DEFAULT_CONTENT: &str = "物語は続きます。次の展開に向けて...";
const DEFAULT_PREVIEW: &str = "次のセクションに続く";
const DEFAULT_THINKING: &str = "物語の展開を考慮しています";
const DEFAULT_ACHIEVED: &str = "基本的な展開を達成";
const DEFAULT_REMAINING: &str = "さらなる展開";

/// 計画見直しの解析結果。
#[derive(Clone, Debug)]
pub struct PlanReview {
    pub analysis: String,
    pub adjustments: String,
    pub future_plans: String,
    pub thinking_process: String,
}

/// `<tag>...</tag>` の最初の出現の中身を返す。タグが無い・壊れている場合は空文字列。
pub fn extract_tag_content(text: &str, tag: &str) -> String {
    if text.is_empty() {
        debug!("無効な入力テキスト（タグ: {}）", tag);
        return String::new();
    }

    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if !text.contains(&open) || !text.contains(&close) {
        debug!("タグ {} が見つかりません", tag);
        return String::new();
    }

    let pattern = format!(r"(?s)<{0}>\s*(.*?)\s*</{0}>", regex::escape(tag));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("タグ {} の検索パターンが不正: {}", tag, e);
            return String::new();
        }
    };

    match re.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => {
            debug!("タグ {} の内容を抽出できません", tag);
            String::new()
        }
    }
}

/// `<content>` タグの中身を寛容に抽出する。
///
/// 閉じタグが無い場合は次のタグの開始（`<`）まで、それも無ければ末尾までを
/// 内容として扱う。開始タグ自体が無い場合はテキスト全体をそのまま返す。
pub fn extract_content_tag(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    const START_TAG: &str = "<content>";
    let start_pos = match text.find(START_TAG) {
        Some(pos) => pos + START_TAG.len(),
        None => {
            debug!("content タグが見つかりません");
            return text.to_string();
        }
    };

    let remaining = &text[start_pos..];
    let content = if let Some(end) = remaining.find("</content>") {
        &remaining[..end]
    } else if let Some(next) = remaining.find('<') {
        &remaining[..next]
    } else {
        remaining
    };

    content.trim().to_string()
}

/// 進行度の数値を抽出する。数値が取れない場合はキーワードから推定する。
pub fn extract_percentage(text: &str) -> f64 {
    let re = Regex::new(r"(\d+(?:\.\d+)?)").unwrap();
    if let Some(caps) = re.captures(text) {
        if let Ok(value) = caps[1].parse::<f64>() {
            if (0.0..=100.0).contains(&value) {
                return value;
            }
        }
    }

    warn!("進行度の抽出に失敗しました。テキスト: {}", text);
    let lower = text.to_lowercase();
    if ["完了", "終了", "完結"].iter().any(|w| lower.contains(w)) {
        100.0
    } else if ["開始", "始め"].iter().any(|w| lower.contains(w)) {
        0.0
    } else if ["中盤", "半ば"].iter().any(|w| lower.contains(w)) {
        50.0
    } else {
        25.0
    }
}

fn split_points(text: &str, default: &str) -> Vec<String> {
    let points: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if points.is_empty() {
        vec![default.to_string()]
    } else {
        points
    }
}

fn default_section_data() -> SectionData {
    SectionData {
        content: DEFAULT_CONTENT.to_string(),
        progress: Progress {
            percentage: 25.0,
            achieved_points: vec!["基本的な展開".to_string()],
            remaining_points: vec!["今後の展開".to_string()],
        },
        next_preview: DEFAULT_PREVIEW.to_string(),
        thinking: DEFAULT_THINKING.to_string(),
    }
}

/// セクション応答の解析。LLM 出力の崩れは想定内なので決して失敗しない。
/// 個々のタグが欠けている場合は段階的にフォールバックする。
pub fn parse_section_data(response_text: &str, thinking: &str) -> SectionData {
    if response_text.trim().is_empty() {
        warn!("無効な応答テキストのためデフォルトのセクションデータを返します");
        return default_section_data();
    }

    let mut thinking = thinking.to_string();
    if thinking.is_empty() {
        thinking = extract_tag_content(response_text, "thinking");
        if !thinking.is_empty() {
            debug!("応答テキストから思考プロセスを抽出しました");
        }
    }
    if thinking.is_empty() {
        warn!("思考プロセスが見つかりません");
        thinking = DEFAULT_THINKING.to_string();
    }

    let mut section = extract_tag_content(response_text, "section");
    if section.is_empty() {
        warn!("セクションタグが見つかりません。応答全体をコンテンツとして使用します");
        section = response_text.to_string();
    }

    let mut content = extract_content_tag(&section);
    if content.is_empty() {
        warn!("コンテンツが抽出できません。セクション全体を使用します");
        content = section.clone();
    }
    if content.trim().chars().count() < 10 {
        warn!("コンテンツが極端に短いためデフォルト値を使用");
        content = DEFAULT_CONTENT.to_string();
    }

    let progress_text = extract_tag_content(&section, "progress");
    let percentage = extract_percentage(&extract_tag_content(&progress_text, "percentage"));

    let achieved_points = split_points(
        &extract_tag_content(&progress_text, "achieved_points"),
        DEFAULT_ACHIEVED,
    );
    let remaining_points = split_points(
        &extract_tag_content(&progress_text, "remaining_points"),
        DEFAULT_REMAINING,
    );

    let next_preview = {
        let preview = extract_tag_content(&section, "next_preview");
        if preview.is_empty() {
            DEFAULT_PREVIEW.to_string()
        } else {
            preview
        }
    };

    SectionData {
        content,
        progress: Progress {
            percentage,
            achieved_points,
            remaining_points,
        },
        next_preview,
        thinking,
    }
}

fn find_blocks(text: &str, tag: &str) -> Vec<String> {
    let pattern = format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag));
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// `<character>` ブロックを全て解析する。欠けたサブフィールドは空文字列になる。
pub fn parse_characters(text: &str) -> Vec<Character> {
    find_blocks(text, "character")
        .iter()
        .map(|block| Character {
            name: extract_tag_content(block, "name"),
            role: extract_tag_content(block, "role"),
            personality: extract_tag_content(block, "personality"),
        })
        .collect()
}

pub fn parse_base_settings(response_text: &str) -> StoryBaseSettings {
    let story_base = extract_tag_content(response_text, "story_base");
    let thinking = extract_tag_content(response_text, "thinking");

    let themes = extract_tag_content(&story_base, "themes")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    StoryBaseSettings {
        themes,
        characters: parse_characters(&story_base),
        world_setting: extract_tag_content(&story_base, "world_setting"),
        tone: extract_tag_content(&story_base, "tone"),
        thinking_process: thinking,
    }
}

pub fn parse_story_plan(response_text: &str) -> StoryPlan {
    let story_plan = extract_tag_content(response_text, "story_plan");
    let thinking = extract_tag_content(response_text, "thinking");

    StoryPlan {
        outline: extract_tag_content(&story_plan, "outline"),
        major_points: parse_major_points(&story_plan),
        sections: parse_planned_sections(&story_plan),
        foreshadowing: parse_foreshadowing(&story_plan),
        thinking_process: thinking,
        adjustments: Vec::new(),
    }
}

fn parse_major_points(text: &str) -> Vec<String> {
    let major_points_text = extract_tag_content(text, "major_points");
    find_blocks(&major_points_text, "point")
        .iter()
        .map(|p| p.trim().to_string())
        .collect()
}

fn parse_planned_sections(text: &str) -> Vec<StorySection> {
    find_blocks(text, "section")
        .iter()
        .map(|block| {
            StorySection::new(
                extract_tag_content(block, "content"),
                extract_tag_content(block, "goals"),
            )
        })
        .collect()
}

fn parse_foreshadowing(text: &str) -> Vec<String> {
    let foreshadowing_text = extract_tag_content(text, "foreshadowing");
    find_blocks(&foreshadowing_text, "element")
        .iter()
        .map(|e| e.trim().to_string())
        .collect()
}

/// 計画見直し応答の解析。各要素が空でも既定の文言で埋めて必ず結果を返す。
pub fn parse_plan_review(response_text: &str) -> PlanReview {
    let mut block = extract_tag_content(response_text, "plan_review");
    if block.is_empty() {
        warn!("plan_reviewタグが見つかりません");
        block = response_text.to_string();
    }

    let analysis = extract_tag_content(&block, "analysis");
    let adjustments = extract_tag_content(&block, "adjustments");
    let future_plans = extract_tag_content(&block, "future_plans");
    let thinking = extract_tag_content(response_text, "thinking");

    if analysis.is_empty() && adjustments.is_empty() && future_plans.is_empty() {
        warn!("計画見直しの結果が不完全です");
    }

    let or_default = |value: String, default: &str| {
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    };

    PlanReview {
        analysis: or_default(analysis, "分析情報なし"),
        adjustments: or_default(adjustments, "調整不要"),
        future_plans: or_default(future_plans, "計画の継続"),
        thinking_process: or_default(thinking, "思考プロセスなし"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag_content_trims_whitespace() {
        assert_eq!(extract_tag_content("<tone>  静かな緊張感  </tone>", "tone"), "静かな緊張感");
        assert_eq!(
            extract_tag_content("<outline>\n行1\n行2\n</outline>", "outline"),
            "行1\n行2"
        );
    }

    #[test]
    fn test_extract_tag_content_missing_or_malformed() {
        assert_eq!(extract_tag_content("", "tone"), "");
        assert_eq!(extract_tag_content("タグなし", "tone"), "");
        // 閉じタグだけでは抽出しない
        assert_eq!(extract_tag_content("本文</tone>", "tone"), "");
    }

    #[test]
    fn test_extract_tag_content_first_match_non_greedy() {
        let text = "<point>一つ目</point><point>二つ目</point>";
        assert_eq!(extract_tag_content(text, "point"), "一つ目");
    }

    #[test]
    fn test_extract_content_tag_without_tag_returns_input() {
        let text = "タグのない本文がそのまま返る";
        assert_eq!(extract_content_tag(text), text);
    }

    #[test]
    fn test_extract_content_tag_unclosed_stops_at_next_tag() {
        let text = "<content>ここまでが本文<next_preview>次回予告</next_preview>";
        assert_eq!(extract_content_tag(text), "ここまでが本文");
    }

    #[test]
    fn test_extract_content_tag_unclosed_runs_to_end() {
        assert_eq!(extract_content_tag("<content>残り全部"), "残り全部");
    }

    #[test]
    fn test_extract_content_tag_closed() {
        assert_eq!(extract_content_tag("<content> 本文 </content>後続"), "本文");
    }

    #[test]
    fn test_extract_percentage_plain_number() {
        assert_eq!(extract_percentage("45%"), 45.0);
        assert_eq!(extract_percentage("進行度は 72.5 です"), 72.5);
    }

    #[test]
    fn test_extract_percentage_out_of_range_falls_back() {
        // 範囲外の数値はキーワード推定に回る
        assert_eq!(extract_percentage("999"), 25.0);
    }

    #[test]
    fn test_extract_percentage_keywords() {
        assert_eq!(extract_percentage("進行完了"), 100.0);
        assert_eq!(extract_percentage("物語の開始"), 0.0);
        assert_eq!(extract_percentage("中盤に入った"), 50.0);
        assert_eq!(extract_percentage("不明"), 25.0);
    }

    fn section_response(content: &str, percentage: &str) -> String {
        format!(
            "<thinking>考察</thinking>\n<section>\n<content>{}</content>\n\
             <progress>\n<percentage>{}</percentage>\n\
             <achieved_points>\n主人公の登場\n</achieved_points>\n\
             <remaining_points>\n伏線の回収\n</remaining_points>\n</progress>\n\
             <next_preview>次の展開</next_preview>\n</section>",
            content, percentage
        )
    }

    #[test]
    fn test_parse_section_data_well_formed() {
        let response = section_response("これは十分な長さのあるセクション本文です。", "30");
        let data = parse_section_data(&response, "");

        assert_eq!(data.content, "これは十分な長さのあるセクション本文です。");
        assert_eq!(data.progress.percentage, 30.0);
        assert_eq!(data.progress.achieved_points, vec!["主人公の登場"]);
        assert_eq!(data.progress.remaining_points, vec!["伏線の回収"]);
        assert_eq!(data.next_preview, "次の展開");
        assert_eq!(data.thinking, "考察");
    }

    #[test]
    fn test_parse_section_data_empty_response_defaults() {
        let data = parse_section_data("", "");
        assert_eq!(data.content, DEFAULT_CONTENT);
        assert_eq!(data.progress.percentage, 25.0);
        assert_eq!(data.next_preview, DEFAULT_PREVIEW);
        assert_eq!(data.thinking, DEFAULT_THINKING);
    }

    #[test]
    fn test_parse_section_data_short_content_replaced() {
        let response = section_response("短い", "30");
        let data = parse_section_data(&response, "");
        assert_eq!(data.content, DEFAULT_CONTENT);
    }

    #[test]
    fn test_parse_section_data_missing_section_tag_uses_whole_response() {
        let response = "タグなしだが十分な長さのある応答テキストです。物語が続きます。";
        let data = parse_section_data(response, "事前の思考");
        assert_eq!(data.content, response);
        assert_eq!(data.thinking, "事前の思考");
        // progress が無いのでキーワード推定の既定値
        assert_eq!(data.progress.percentage, 25.0);
        assert_eq!(data.progress.achieved_points, vec![DEFAULT_ACHIEVED]);
        assert_eq!(data.progress.remaining_points, vec![DEFAULT_REMAINING]);
    }

    #[test]
    fn test_parse_characters() {
        let text = "<character><name>葵</name><role>主人公</role>\
                    <personality>好奇心旺盛</personality></character>\
                    <character><name>真琴</name></character>";
        let characters = parse_characters(text);

        assert_eq!(characters.len(), 2);
        assert_eq!(characters[0].name, "葵");
        assert_eq!(characters[0].role, "主人公");
        assert_eq!(characters[1].name, "真琴");
        // 欠けたサブフィールドは空文字列
        assert_eq!(characters[1].role, "");
    }

    #[test]
    fn test_parse_base_settings() {
        let response = "<thinking>方向性の考察</thinking>\n<story_base>\n\
            <themes>\n自然との共生\n喪失と再生\n</themes>\n\
            <characters><character><name>葵</name><role>主人公</role>\
            <personality>内向的</personality></character></characters>\n\
            <world_setting>近未来の日本</world_setting>\n\
            <tone>静かで神秘的</tone>\n</story_base>";

        let settings = parse_base_settings(response);
        assert_eq!(settings.themes, vec!["自然との共生", "喪失と再生"]);
        assert_eq!(settings.characters.len(), 1);
        assert_eq!(settings.world_setting, "近未来の日本");
        assert_eq!(settings.tone, "静かで神秘的");
        assert_eq!(settings.thinking_process, "方向性の考察");
    }

    #[test]
    fn test_parse_story_plan() {
        let response = "<thinking>構成の考察</thinking>\n<story_plan>\n\
            <outline>全体の流れ</outline>\n\
            <major_points><point>出会い</point><point>対立</point></major_points>\n\
            <sections><section><content>導入</content><goals>世界観の提示</goals></section>\
            <section><content>展開</content><goals>謎の提示</goals></section></sections>\n\
            <foreshadowing><element>古い地図</element></foreshadowing>\n</story_plan>";

        let plan = parse_story_plan(response);
        assert_eq!(plan.outline, "全体の流れ");
        assert_eq!(plan.major_points, vec!["出会い", "対立"]);
        assert_eq!(plan.sections.len(), 2);
        assert_eq!(plan.sections[0].goals, "世界観の提示");
        assert_eq!(plan.foreshadowing, vec!["古い地図"]);
        assert!(plan.adjustments.is_empty());
    }

    #[test]
    fn test_parse_plan_review_well_formed() {
        let response = "<thinking>見直しの考察</thinking>\n<plan_review>\n\
            <analysis>展開が早い</analysis>\n<adjustments>テンポを落とす</adjustments>\n\
            <future_plans>日常描写を増やす</future_plans>\n</plan_review>";

        let review = parse_plan_review(response);
        assert_eq!(review.analysis, "展開が早い");
        assert_eq!(review.adjustments, "テンポを落とす");
        assert_eq!(review.future_plans, "日常描写を増やす");
        assert_eq!(review.thinking_process, "見直しの考察");
    }

    #[test]
    fn test_parse_plan_review_missing_block_uses_defaults() {
        let review = parse_plan_review("構造化されていない応答");
        assert_eq!(review.analysis, "分析情報なし");
        assert_eq!(review.adjustments, "調整不要");
        assert_eq!(review.future_plans, "計画の継続");
        assert_eq!(review.thinking_process, "思考プロセスなし");
    }
}
