mod config;
mod llm;
mod logs;
mod models;
mod parser;
mod prompts;
mod section;
mod story;

use anyhow::Result;
use config::Config;
use story::StoryManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    let llm = llm::create_llm(&config.llm_type, &config.llm)?;

    let max_sections = config.generation.max_sections;
    let total_length = config.generation.length.clone();

    let mut manager = StoryManager::new(config, llm)?;
    let story = manager.generate_full_story(max_sections, &total_length).await?;

    println!("{}", story);
    println!("\n=== 最終文字数: {}文字 ===", manager.current_length());

    Ok(())
}
