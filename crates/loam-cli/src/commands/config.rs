use std::env;

use loam_core::util::{is_endpoint_url, normalize_text_option};
use loam_core::OwnerId;

use crate::cli::ConfigCommands;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Values passed to `config init`.
#[derive(Debug, Default)]
pub struct ProfileInit {
    pub api_base_url: Option<String>,
    pub owner_id: Option<String>,
    pub refresh_endpoint: Option<String>,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_base_url,
            owner_id,
            refresh_endpoint,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileInit {
                api_base_url,
                owner_id,
                refresh_endpoint,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    init: ProfileInit,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = apply_profile_init(&mut config, profile_name, init, no_activate)?;

    let path = config.save()?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    if profile.owner_id.is_some() {
        println!(
            "Profile '{profile_name}' syncs as '{}'. Set LOAM_ACCESS_TOKEN, then run `loam sync`.",
            profile.effective_owner()
        );
    } else {
        println!("Profile '{profile_name}' is local-only until an owner ID is configured.");
    }
    Ok(())
}

/// Merge explicit values, then `LOAM_*` environment values, over the
/// existing profile. Returns the resolved profile name.
pub fn apply_profile_init(
    config: &mut CliProfilesConfig,
    profile_name: Option<&str>,
    init: ProfileInit,
    no_activate: bool,
) -> Result<String, CliError> {
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let merged = CliProfile {
        api_base_url: normalize_text_option(init.api_base_url)
            .or_else(|| normalize_text_option(env::var("LOAM_API_BASE_URL").ok()))
            .or(existing.api_base_url),
        owner_id: normalize_text_option(init.owner_id).or(existing.owner_id),
        refresh_endpoint: normalize_text_option(init.refresh_endpoint)
            .or_else(|| normalize_text_option(env::var("LOAM_REFRESH_ENDPOINT").ok()))
            .or(existing.refresh_endpoint),
        sync: existing.sync,
    };
    validate_profile(&merged)?;

    *config.profile_mut_or_default(&profile_name) = merged;
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }
    Ok(profile_name)
}

fn run_config_show(global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(global_profile);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let settings = profile.sync_settings()?;
    println!("Profile:          {profile_name}");
    println!("Owner:            {}", profile.effective_owner());
    println!("API base URL:     {}", settings.normalized_base_url());
    println!(
        "Refresh endpoint: {}",
        profile.refresh_endpoint.as_deref().unwrap_or("(none)")
    );
    println!("Batch size:       {}", settings.batch_size);
    println!("Max attempts:     {}", settings.max_attempts);
    Ok(())
}

fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = &profile.api_base_url {
        if !is_endpoint_url(url) {
            return Err(CliError::Config(
                "api_base_url must be an http:// or https:// URL with a host".to_string(),
            ));
        }
    }
    if let Some(url) = &profile.refresh_endpoint {
        if !is_endpoint_url(url) {
            return Err(CliError::Config(
                "refresh_endpoint must be an http:// or https:// URL with a host".to_string(),
            ));
        }
    }
    if let Some(owner_id) = &profile.owner_id {
        OwnerId::new(owner_id.as_str())?;
    }
    Ok(())
}
