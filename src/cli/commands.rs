use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::warn;

use crate::cli::config::SpiderConfig;
use crate::spider::Spider;

/// Start the pipeline and block until it shuts down.
pub async fn run(profile: Option<String>, seed: Option<String>) -> Result<()> {
    let mut config = match profile {
        Some(name) => SpiderConfig::load_profile(&name)
            .context(format!("Failed to load profile: {}", name))?,
        None => SpiderConfig::load_default()?,
    };

    if let Some(seed) = seed {
        config.spider.seed_token = Some(seed);
    }

    config.validate()?;

    let spider = Spider::new(Arc::new(config)).await?;
    spider.run().await
}

/// Print the default configuration.
pub async fn show_config() -> Result<()> {
    let config = SpiderConfig::load_default()?;
    println!("{:#?}", config);
    Ok(())
}

/// Print a named profile, creating it from defaults when missing.
pub async fn show_profile(profile_name: String) -> Result<()> {
    match SpiderConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!(
                "Profile '{}' does not exist. Creating a default profile.",
                profile_name
            );
            let config = SpiderConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// List all available configuration profiles.
pub async fn list_profiles() -> Result<()> {
    let profiles = SpiderConfig::list_profiles()?;

    if profiles.is_empty() {
        println!("No configuration profiles found");
        return Ok(());
    }

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}
