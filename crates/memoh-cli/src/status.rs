//! `memoh status` — show configuration and provider status.
//!
//! - Shows config path, data root, default model
//! - Shows API key status for each provider

use anyhow::Result;
use colored::Colorize;

use memoh_core::config::load_config;
use memoh_core::utils::get_data_path;
use memoh_providers::registry::PROVIDERS;

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config();
    let data_dir = get_data_path();
    let config_path = data_dir.join("config.json");

    println!();
    println!("{}", "Memoh Status".cyan().bold());
    println!();

    // Config
    let config_exists = config_path.exists();
    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_exists {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Data root
    let data_root = crate::helpers::expand_tilde(&config.runtime.data_root);
    let dr_exists = data_root.exists();
    println!(
        "  {:<18} {} {}",
        "Data root:".bold(),
        data_root.display(),
        if dr_exists {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Model
    println!(
        "  {:<18} {}",
        "Chat model:".bold(),
        config.runtime.default_chat_model
    );
    println!(
        "  {:<18} {}",
        "Embed model:".bold(),
        config.runtime.default_embedding_model
    );

    // Temperature & tokens
    println!(
        "  {:<18} {} | max_tokens: {}",
        "Parameters:".bold(),
        format!("temp: {}", config.runtime.temperature).dimmed(),
        format!("{}", config.runtime.max_tokens).dimmed(),
    );

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    let providers_map = config.providers.to_map();

    for spec in PROVIDERS {
        let status = if let Some(prov_config) = providers_map.get(spec.name) {
            if prov_config.is_configured() {
                format!("{} (key set)", "✓".green())
            } else {
                "· not configured".dimmed().to_string()
            }
        } else {
            "· not configured".dimmed().to_string()
        };
        println!("    {:<20} {}", spec.display_name, status);
    }

    // Channels
    println!();
    println!("  {}", "Channels:".bold());
    let ch = &config.channels;
    println!("    {:<20} {}", "Telegram", configured_label(!ch.telegram.token.is_empty()));
    println!("    {:<20} {}", "Discord", configured_label(!ch.discord.token.is_empty()));
    println!("    {:<20} {}", "Feishu", configured_label(!ch.feishu.app_id.is_empty()));
    println!(
        "    {:<20} {}",
        "Local web",
        configured_label(ch.local.web_enabled)
    );

    println!();
    println!(
        "  {:<18} {}:{}",
        "Gateway:".bold(),
        config.gateway.host,
        config.gateway.port
    );

    println!();

    Ok(())
}

fn configured_label(configured: bool) -> String {
    if configured {
        "✓".green().to_string()
    } else {
        "· not configured".dimmed().to_string()
    }
}
