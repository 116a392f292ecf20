use anyhow::Result;
use chrono::{DateTime, Utc};
use inquire::{Confirm, Password, Select, Text};
use std::fmt;

use relman_core::{
    available_parents, parse_form_date, Build, BuildDraft, Credentials, LookupContext, Release,
    ReleaseDraft, ReleaseStatus, ReleaseType, System, SystemDraft, SystemType,
};

/// A list entry shown by label and resolved to an id
struct Choice {
    id: String,
    label: String,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

fn select_id(message: &str, choices: Vec<Choice>) -> Result<String> {
    if choices.is_empty() {
        anyhow::bail!("Nothing to choose from for '{}'", message);
    }
    Ok(Select::new(message, choices).prompt()?.id)
}

fn optional_text(message: &str) -> Result<Option<String>> {
    let value = Text::new(message).prompt()?;
    let value = value.trim();
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

/// Asks for a date until it parses; empty input yields `None`
fn optional_date(message: &str) -> Result<Option<DateTime<Utc>>> {
    loop {
        let Some(value) = optional_text(message)? else {
            return Ok(None);
        };
        match parse_form_date(&value) {
            Ok(date) => return Ok(Some(date)),
            Err(e) => eprintln!("{}", e),
        }
    }
}

pub fn prompt_credentials(email: Option<&str>) -> Result<Credentials> {
    let email = match email {
        Some(email) => email.to_string(),
        None => Text::new("Email:").prompt()?,
    };
    let password = Password::new("Password:")
        .without_confirmation()
        .prompt()?;
    Ok(Credentials { email, password })
}

pub fn prompt_new_release() -> Result<ReleaseDraft> {
    let name = Text::new("Name:").prompt()?;
    let mut draft = ReleaseDraft::new(name);
    draft.description = optional_text("Description:")?;
    draft.release_date = optional_date("Release date (YYYY-MM-DD, empty for none):")?;
    draft.status = Select::new("Status:", ReleaseStatus::all().to_vec()).prompt()?;
    draft.release_type = Select::new("Type:", ReleaseType::all().to_vec())
        .with_starting_cursor(1)
        .prompt()?;
    Ok(draft)
}

/// Prompts for a system; subsystems pick their parent from the parent systems
pub fn prompt_new_system(systems: &[System]) -> Result<SystemDraft> {
    let name = Text::new("Name:").prompt()?;
    let system_type = Select::new("Type:", SystemType::all().to_vec()).prompt()?;

    let mut draft = SystemDraft::new(name, system_type);
    if system_type == SystemType::Subsystem {
        let parents = available_parents(None, systems)
            .into_iter()
            .map(|s| Choice {
                id: s.id.clone(),
                label: s.name.clone(),
            })
            .collect();
        draft.parent_id = Some(select_id("Parent system:", parents)?);
    }
    draft.description = optional_text("Description:")?;
    Ok(draft)
}

pub fn prompt_new_build(systems: &[System]) -> Result<BuildDraft> {
    let choices = systems
        .iter()
        .map(|s| Choice {
            id: s.id.clone(),
            label: format!("{} ({})", s.name, s.system_type),
        })
        .collect();
    let system_id = select_id("System:", choices)?;
    let version = Text::new("Version:").prompt()?;
    let build_date = optional_date("Build date (YYYY-MM-DD, empty for today):")?
        .unwrap_or_else(today);
    Ok(BuildDraft {
        system_id,
        version,
        build_date,
        release_id: None,
    })
}

/// Midnight UTC of the current day
pub fn today() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or_else(Utc::now)
}

pub fn prompt_select_build(builds: &[Build], ctx: &LookupContext<'_>) -> Result<String> {
    let choices = builds
        .iter()
        .map(|b| Choice {
            id: b.id.clone(),
            label: format!("{} {} ({})", ctx.build_system_name(b), b.version, b.id),
        })
        .collect();
    select_id("Build to add:", choices)
}

pub fn prompt_select_release(releases: &[Release]) -> Result<String> {
    let choices = releases
        .iter()
        .map(|r| Choice {
            id: r.id.clone(),
            label: format!("{} [{}]", r.name, r.status),
        })
        .collect();
    select_id("Release:", choices)
}

pub fn confirm(message: &str) -> Result<bool> {
    Ok(Confirm::new(message).with_default(false).prompt()?)
}
