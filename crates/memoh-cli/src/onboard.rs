//! `memoh onboard` — initialize configuration and the local workspace.
//!
//! - Creates `~/.memoh/config.json` with defaults
//! - Creates a local workspace directory with template files, used by the
//!   local CLI/REPL bot's `ContextBuilder` and `SkillsLoader`

use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;

use memoh_core::config::{load_config, save_config};
use memoh_core::utils::get_data_path;

/// Root of the local workspace used by the standalone CLI bot.
fn default_workspace_path() -> PathBuf {
    get_data_path().join("workspace")
}

/// Run the onboard command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "Memoh — Setup".cyan().bold());
    println!();

    let data_dir = get_data_path();
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        println!("  {} config already exists at {}", "✓".green(), config_path.display());
    } else {
        let config = load_config();
        save_config(&config, &config_path)?;
        println!("  {} created config at {}", "✓".green(), config_path.display());
    }

    let workspace = default_workspace_path();
    std::fs::create_dir_all(&workspace)?;
    println!("  {} workspace at {}", "✓".green(), workspace.display());

    let memory_dir = workspace.join("memory");
    std::fs::create_dir_all(&memory_dir)?;
    println!("  {} memory dir at {}", "✓".green(), memory_dir.display());

    create_template(&workspace.join("AGENTS.md"), AGENTS_TEMPLATE)?;
    create_template(&workspace.join("SOUL.md"), SOUL_TEMPLATE)?;
    create_template(&workspace.join("USER.md"), USER_TEMPLATE)?;
    create_template(&workspace.join("HEARTBEAT.md"), HEARTBEAT_TEMPLATE)?;
    create_template(&memory_dir.join("MEMORY.md"), MEMORY_TEMPLATE)?;

    let skills_dir = workspace.join("skills");
    std::fs::create_dir_all(&skills_dir)?;
    let sc_dir = skills_dir.join("skill-creator");
    if !sc_dir.exists() {
        std::fs::create_dir_all(&sc_dir)?;
        std::fs::write(sc_dir.join("SKILL.md"), SKILL_CREATOR_TEMPLATE)?;
        println!("  {} created skill: skill-creator", "✓".green());
    } else {
        println!("  {} skill-creator already exists", "✓".green());
    }

    let history_dir = data_dir.join("history");
    std::fs::create_dir_all(&history_dir)?;

    println!();
    println!("{}", "  Setup complete! Run `memoh chat` to start talking to your bot.".green());
    println!();

    Ok(())
}

/// Create a template file if it doesn't exist.
fn create_template(path: &Path, content: &str) -> Result<()> {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    if path.exists() {
        println!("  {} {} already exists", "✓".green(), name);
    } else {
        std::fs::write(path, content)?;
        println!("  {} created {}", "✓".green(), name);
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────

const AGENTS_TEMPLATE: &str = r#"# Agents

Configuration and personality for your bot.

## Default Bot

- **Name**: Assistant
- **Role**: Personal AI assistant
- **Style**: Concise, helpful, technical when needed
"#;

const USER_TEMPLATE: &str = r#"# User Profile

Tell your bot about yourself so it can personalize its responses.

## About Me

- **Name**: (your name)
- **Role**: (your role/profession)
- **Preferences**: (communication preferences)
"#;

const SOUL_TEMPLATE: &str = r#"# Soul

I am a lightweight AI assistant running inside a sandboxed container.

## Personality

- Helpful and friendly
- Concise and to the point
- Curious and eager to learn

## Values

- Accuracy over speed
- User privacy and safety
- Transparency in actions
"#;

const HEARTBEAT_TEMPLATE: &str = r#"# Heartbeat Tasks

Add tasks below that you want the bot to work on periodically.

If this file has no tasks (only headers and comments), the periodic
pass will skip it.

## Active Tasks

<!-- Add your periodic tasks below this line -->


## Completed

<!-- Move completed tasks here or delete them -->
"#;

const MEMORY_TEMPLATE: &str = r#"# Long-term Memory

Important information is persisted here automatically.
You can also edit this file directly.
"#;

const SKILL_CREATOR_TEMPLATE: &str = r#"---
name: skill-creator
description: Use when asked to create, scaffold, or document a new skill.
---

# Skill Creator

A skill is a markdown file describing a focused capability: when to use
it, what steps to follow, and any constraints. To create one:

1. Pick a short, kebab-case name that describes what the skill *does*.
2. Write frontmatter with `name` and `description` — the description is
   what decides whether the skill gets pulled into context, so be
   specific about when it applies.
3. Write the body as a procedure: concrete steps, not a prose summary.
4. Save it under the workspace's `skills/<name>/SKILL.md`.
"#;

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_template_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TEST.md");
        create_template(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn create_template_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TEST.md");
        std::fs::write(&path, "original").unwrap();
        create_template(&path, "new content").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn templates_not_empty() {
        assert!(!AGENTS_TEMPLATE.is_empty());
        assert!(!USER_TEMPLATE.is_empty());
        assert!(!MEMORY_TEMPLATE.is_empty());
        assert!(!SKILL_CREATOR_TEMPLATE.is_empty());
    }

    #[test]
    fn default_workspace_under_data_dir() {
        let path = default_workspace_path();
        assert!(path.ends_with("workspace"));
        assert!(path.parent().unwrap().ends_with(".memoh"));
    }
}
