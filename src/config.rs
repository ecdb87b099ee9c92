use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub output_dir: String,

    pub llm_type: String,

    #[serde(rename = "llm_config")]
    pub llm: LlmConfig,

    pub story_setting: String,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub base_url: Option<String>,

    /// モデル調整パラメータ。中身は解釈せずバックエンドへそのまま渡す。
    #[serde(default)]
    pub model: ModelParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    #[serde(default = "default_length")]
    pub length: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_sections: default_max_sections(),
            length: default_length(),
        }
    }
}

fn default_max_sections() -> usize {
    20
}

fn default_length() -> String {
    "中編（3万字程度）".to_string()
}

const DEFAULT_STORY_SETTING: &str = "\
近未来の日本を舞台に、自然との繋がりを失いつつある世界で、
高校生の主人公が古い伝説に導かれながら神秘的な森の秘密を探る物語。
主人公は両親の離婚後、祖母と暮らしており、古い伝承に強い興味を持っている。
クラスメイトの女子生徒は、科学者の家庭で育ったが、
理屈では説明できない現象に惹かれている。";

impl Config {
    /// 組み込みのデフォルト設定。API キーは環境変数から拾う。
    pub fn default_config() -> Self {
        Self {
            output_dir: "novel_output".to_string(),
            llm_type: "gemini".to_string(),
            llm: LlmConfig {
                api_key: std::env::var("GEMINI_API_KEY").ok(),
                model_name: None,
                base_url: None,
                model: ModelParams {
                    temperature: Some(0.9),
                    top_p: Some(0.95),
                    top_k: Some(64),
                    max_output_tokens: Some(8192),
                },
            },
            story_setting: DEFAULT_STORY_SETTING.to_string(),
            generation: GenerationConfig::default(),
        }
    }

    /// config.yml を読み込む。見つからない場合はデフォルト設定にフォールバック。
    /// 必須キーの欠けたファイルはそのキー名を含むエラーで失敗する。
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("設定ファイルが見つかりません: {}", path.display());
            info!("デフォルト設定を使用します");
            return Ok(Self::default_config());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("設定ファイルを読み込みました: {}", path.display());
        Ok(config)
    }
}
