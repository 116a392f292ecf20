mod cli;
mod prompts;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::{ColoredString, Colorize};
use std::path::Path;

use relman_core::rules::{check_delete_system, release_version};
use relman_core::{
    available_parents, create_backend, get_config_path, parent_name, parse_form_date, project,
    subsystems_of, system_counts, system_tree, Build, BuildDraft, Config, DeploymentDraft,
    DeploymentStatus, DeploymentUpdate, DomainError, DomainService, Environment, EnvironmentDraft,
    EnvironmentGroup, EnvironmentGroupDraft, EnvironmentStatus, EnvironmentType, LookupContext,
    Profile, Projectable, Release, ReleaseDraft, ReleaseStatus, ReleaseType, SortOrder, System,
    SystemDraft, SystemStatus, SystemType, TypeFilter, ViewOptions,
};

use crate::cli::{
    BuildCommand, Cli, Command, EnvCommand, GroupCommand, ListArgs, ProfileCommand,
    ReleaseCommand, SystemCommand,
};

type Service = DomainService;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = get_config_path()?;
    let mut config = Config::load_or_create(&config_path)?;

    if let Command::Profile(cmd) = &cli.command {
        return handle_profile_command(cmd, &mut config, &config_path);
    }

    let (profile_name, profile) = config.resolve_profile(cli.profile.as_deref())?;
    log::debug!("using profile '{}' at {}", profile_name, profile.base_url);
    let backend = create_backend(&profile.base_url, profile.effective_token(), profile.timeout())
        .with_context(|| format!("Cannot use profile '{}'", profile_name))?;
    let service = DomainService::new(backend);

    let result = match &cli.command {
        Command::Login { email } => login(
            &service,
            &mut config,
            &config_path,
            &profile_name,
            email.as_deref(),
            false,
        ),
        Command::Register { email } => login(
            &service,
            &mut config,
            &config_path,
            &profile_name,
            email.as_deref(),
            true,
        ),
        Command::Logout => logout(&mut config, &config_path, &profile_name),
        Command::Whoami => whoami(&service, &profile),
        Command::Release(cmd) => handle_release_command(cmd, &service),
        Command::Build(cmd) => handle_build_command(cmd, &service),
        Command::System(cmd) => handle_system_command(cmd, &service),
        Command::Env(cmd) => handle_env_command(cmd, &service),
        Command::Group(cmd) => handle_group_command(cmd, &service),
        Command::Profile(_) => Ok(()),
    };

    if let Err(err) = &result {
        if let Some(domain) = err.downcast_ref::<DomainError>() {
            if domain.requires_reauth() {
                if config.clear_session(&profile_name) {
                    config.save(&config_path)?;
                }
                eprintln!(
                    "{}",
                    format!(
                        "Session for profile '{}' is no longer valid. Run `relman login`.",
                        profile_name
                    )
                    .yellow()
                );
            } else if domain.is_retryable() {
                eprintln!("{}", "The server could not be reached; try again.".yellow());
            }
        }
    }

    result
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

// =============================================================================
// Shared helpers
// =============================================================================

fn view_options<T: Projectable>(args: &ListArgs) -> Result<ViewOptions> {
    let mut view = ViewOptions::new();
    if let Some(search) = &args.search {
        view = view.search(search.clone());
    }

    let order = if args.desc {
        SortOrder::Desc
    } else {
        SortOrder::Asc
    };
    match &args.sort {
        Some(field) => view = view.sort(field.clone(), order),
        None if args.desc || args.asc => view = view.sort(T::DEFAULT_SORT.0, order),
        None => {}
    }

    for filter in &args.filters {
        let (key, value) = filter
            .split_once('=')
            .with_context(|| format!("Invalid filter '{}': expected KEY=VALUE", filter))?;
        view = view.filter(key.trim(), value.trim());
    }
    Ok(view)
}

/// Finds an item by exact id, then by name, then by unique id prefix
fn find<'a, T>(
    items: &'a [T],
    key: &str,
    what: &str,
    id: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Result<&'a T> {
    if let Some(item) = items.iter().find(|i| id(*i) == key) {
        return Ok(item);
    }

    let by_name: Vec<&T> = items
        .iter()
        .filter(|i| name(*i).eq_ignore_ascii_case(key.trim()))
        .collect();
    match by_name.len() {
        1 => return Ok(by_name[0]),
        0 => {}
        n => anyhow::bail!("{} name '{}' is ambiguous ({} matches); use the id", what, key, n),
    }

    let by_prefix: Vec<&T> = items.iter().filter(|i| id(*i).starts_with(key)).collect();
    match by_prefix.len() {
        1 => Ok(by_prefix[0]),
        0 => anyhow::bail!("{} '{}' not found", what, key),
        n => anyhow::bail!("{} id prefix '{}' is ambiguous ({} matches)", what, key, n),
    }
}

fn find_release<'a>(releases: &'a [Release], key: &str) -> Result<&'a Release> {
    find(releases, key, "Release", |r| r.id.as_str(), |r| r.name.as_str())
}

fn find_system<'a>(systems: &'a [System], key: &str) -> Result<&'a System> {
    find(systems, key, "System", |s| s.id.as_str(), |s| s.name.as_str())
}

fn find_build<'a>(builds: &'a [Build], key: &str) -> Result<&'a Build> {
    find(builds, key, "Build", |b| b.id.as_str(), |b| b.id.as_str())
}

fn find_environment<'a>(environments: &'a [Environment], key: &str) -> Result<&'a Environment> {
    find(environments, key, "Environment", |e| e.id.as_str(), |e| e.name.as_str())
}

fn find_group<'a>(groups: &'a [EnvironmentGroup], key: &str) -> Result<&'a EnvironmentGroup> {
    find(groups, key, "Environment group", |g| g.id.as_str(), |g| g.name.as_str())
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    Ok(parse_form_date(s)?)
}

fn parse_release_status(s: &str) -> Result<ReleaseStatus> {
    ReleaseStatus::parse(s).with_context(|| format!("Invalid release status: {}", s))
}

fn parse_release_type(s: &str) -> Result<ReleaseType> {
    ReleaseType::parse(s).with_context(|| format!("Invalid release type: {}", s))
}

fn parse_system_type(s: &str) -> Result<SystemType> {
    SystemType::parse(s).with_context(|| format!("Invalid system type: {}", s))
}

fn parse_system_status(s: &str) -> Result<SystemStatus> {
    SystemStatus::parse(s).with_context(|| format!("Invalid system status: {}", s))
}

fn parse_env_type(s: &str) -> Result<EnvironmentType> {
    EnvironmentType::parse(s).with_context(|| format!("Invalid environment type: {}", s))
}

fn parse_env_status(s: &str) -> Result<EnvironmentStatus> {
    EnvironmentStatus::parse(s).with_context(|| format!("Invalid environment status: {}", s))
}

fn parse_deployment_status(s: &str) -> Result<DeploymentStatus> {
    DeploymentStatus::parse(s).with_context(|| format!("Invalid deployment status: {}", s))
}

fn fmt_date(date: &Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn release_status_colored(status: ReleaseStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ReleaseStatus::Draft => label.yellow(),
        ReleaseStatus::Planned => label.blue(),
        ReleaseStatus::InProgress => label.cyan(),
        ReleaseStatus::Released => label.green(),
        ReleaseStatus::Deployed => label.green().bold(),
        ReleaseStatus::Cancelled => label.red(),
    }
}

fn system_status_colored(status: SystemStatus) -> ColoredString {
    match status {
        SystemStatus::Active => "Active".green(),
        SystemStatus::Deprecated => "Deprecated".red(),
    }
}

fn env_status_colored(status: EnvironmentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        EnvironmentStatus::Active => label.green(),
        EnvironmentStatus::Pending => label.yellow(),
        EnvironmentStatus::Maintenance => label.blue(),
        EnvironmentStatus::Decommissioned => label.red(),
    }
}

fn deployment_status_colored(status: DeploymentStatus) -> ColoredString {
    match status {
        DeploymentStatus::Active => "Active".green(),
        DeploymentStatus::Inactive => "Inactive".dimmed(),
    }
}

fn confirm_delete(what: &str, skip_confirm: bool) -> Result<bool> {
    if skip_confirm {
        return Ok(true);
    }
    let confirmed = prompts::confirm(&format!("Are you sure you want to delete this {}?", what))?;
    if !confirmed {
        println!("{}", "Deletion cancelled.".yellow());
    }
    Ok(confirmed)
}

fn print_builds(builds: &[&Build], ctx: &LookupContext<'_>) {
    if builds.is_empty() {
        println!("{}", "No builds found.".yellow());
        return;
    }

    println!(
        "{:<36} | {:<24} | {:<12} | {:<20} | {:<10}",
        "ID", "System", "Version", "Release", "Build date"
    );
    println!("{}", "-".repeat(114));

    for build in builds {
        let release = match build.release_id {
            Some(_) => ctx.build_release_name(build).normal(),
            None => ctx.build_release_name(build).dimmed(),
        };
        println!(
            "{:<36} | {:<24} | {:<12} | {:<20} | {:<10}",
            build.id,
            truncate(ctx.build_system_name(build), 24),
            truncate(&build.version, 12),
            release,
            fmt_date(&build.build_date)
        );
    }
}

// =============================================================================
// Session and profiles
// =============================================================================

fn login(
    service: &Service,
    config: &mut Config,
    config_path: &Path,
    profile_name: &str,
    email: Option<&str>,
    register: bool,
) -> Result<()> {
    let credentials = prompts::prompt_credentials(email)?;
    let response = if register {
        service.register(&credentials)?
    } else {
        service.login(&credentials)?
    };

    config.set_session(profile_name, response.token, response.user.email.clone())?;
    config.save(config_path)?;

    println!(
        "{} {} (profile '{}')",
        "Logged in as".green(),
        response.user.email,
        profile_name
    );
    Ok(())
}

fn logout(config: &mut Config, config_path: &Path, profile_name: &str) -> Result<()> {
    if config.clear_session(profile_name) {
        config.save(config_path)?;
        println!("{}", format!("Logged out of profile '{}'.", profile_name).green());
    } else {
        println!("{}", format!("Profile '{}' has no session.", profile_name).yellow());
    }
    Ok(())
}

fn whoami(service: &Service, profile: &Profile) -> Result<()> {
    let user = service.current_user()?;
    println!("{}", user.email.bold());
    println!("  Server: {}", profile.base_url);
    if user.is_admin {
        println!("  Role: {}", "admin".cyan());
    }
    Ok(())
}

fn handle_profile_command(cmd: &ProfileCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match cmd {
        ProfileCommand::Add {
            name,
            url,
            description,
            timeout,
            default,
        } => {
            let mut profile = Profile::new(url.clone(), description.clone().unwrap_or_default());
            profile.timeout_secs = *timeout;
            config.add_profile(name.clone(), profile);
            if *default {
                config.set_default_profile(name)?;
            }
            config.save(config_path)?;
            println!("{}", format!("Profile '{}' saved.", name).green());
        }
        ProfileCommand::List => {
            if config.profiles.is_empty() {
                println!("{}", "No profiles configured.".yellow());
                return Ok(());
            }
            for (name, profile) in &config.profiles {
                let marker = if config.default_profile.as_deref() == Some(name.as_str()) {
                    "*".green().bold()
                } else {
                    " ".normal()
                };
                let session = match &profile.user_email {
                    Some(email) => email.cyan(),
                    None => "not logged in".dimmed(),
                };
                println!(
                    "{} {:<16} {:<40} {}",
                    marker, name, profile.base_url, session
                );
                if !profile.description.is_empty() {
                    println!("    {}", profile.description.dimmed());
                }
            }
        }
        ProfileCommand::Use { name } => {
            config.set_default_profile(name)?;
            config.save(config_path)?;
            println!("{}", format!("Default profile is now '{}'.", name).green());
        }
    }
    Ok(())
}

// =============================================================================
// Releases
// =============================================================================

fn handle_release_command(cmd: &ReleaseCommand, service: &Service) -> Result<()> {
    match cmd {
        ReleaseCommand::List { view } => list_releases(service, view),
        ReleaseCommand::Show { release } => show_release(service, release),
        ReleaseCommand::Add {
            name,
            description,
            date,
            status,
            r#type,
        } => {
            let draft = match name {
                None => prompts::prompt_new_release()?,
                Some(name) => {
                    let mut draft = ReleaseDraft::new(name.clone());
                    draft.description = description.clone();
                    draft.release_date = date.as_deref().map(parse_date).transpose()?;
                    if let Some(status) = status {
                        draft.status = parse_release_status(status)?;
                    }
                    if let Some(release_type) = r#type {
                        draft.release_type = parse_release_type(release_type)?;
                    }
                    draft
                }
            };
            let release = service.create_release(&draft)?;
            println!("{} {} ({})", "Release created:".green(), release.name, release.id);
            Ok(())
        }
        ReleaseCommand::Edit {
            release,
            name,
            description,
            date,
            status,
            r#type,
        } => {
            let releases = service.releases()?;
            let existing = find_release(&releases, release)?;
            let mut draft = existing.to_draft();
            if let Some(name) = name {
                draft.name = name.clone();
            }
            if let Some(description) = description {
                draft.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            if let Some(date) = date {
                draft.release_date = if date.trim().is_empty() {
                    None
                } else {
                    Some(parse_date(date)?)
                };
            }
            if let Some(status) = status {
                draft.status = parse_release_status(status)?;
            }
            if let Some(release_type) = r#type {
                draft.release_type = parse_release_type(release_type)?;
            }
            let updated = service.update_release(&existing.id, &draft)?;
            println!("{} {}", "Release updated:".green(), updated.name);
            Ok(())
        }
        ReleaseCommand::Del { release, yes } => {
            let releases = service.releases()?;
            let release = find_release(&releases, release)?;
            let builds = service.release_builds(&release.id)?;

            println!("{}", "Release to delete:".yellow());
            println!("  ID: {}", release.id);
            println!("  Name: {}", release.name);
            println!("  Builds: {} (they stay, without a release)", builds.len());

            if confirm_delete("release", *yes)? {
                service.delete_release(&release.id)?;
                println!("{}", "Release deleted successfully!".green());
            }
            Ok(())
        }
        ReleaseCommand::Builds { release, view } => {
            let releases = service.releases()?;
            let release = find_release(&releases, release)?;
            let systems = service.systems()?;
            let builds = service.release_builds(&release.id)?;
            let ctx = LookupContext::new(&systems, &releases);
            print_builds(&project(&builds, &view_options::<Build>(view)?, &ctx), &ctx);
            Ok(())
        }
        ReleaseCommand::Attach { release, build } => {
            let releases = service.releases()?;
            let release = find_release(&releases, release)?;
            let build_id = match build {
                Some(key) => find_build(&service.builds()?, key)?.id.clone(),
                None => {
                    let candidates = service.unassociated_builds(&release.id)?;
                    let systems = service.systems()?;
                    let ctx = LookupContext::new(&systems, &releases);
                    prompts::prompt_select_build(&candidates, &ctx)?
                }
            };
            let build = service.attach_build_to_release(&build_id, &release.id)?;
            println!(
                "{} {} {} -> {}",
                "Build added:".green(),
                build.embedded_system_name().unwrap_or(&build.system_id),
                build.version,
                release.name
            );
            Ok(())
        }
        ReleaseCommand::Detach { build } => {
            let builds = service.builds()?;
            let build = find_build(&builds, build)?;
            if build.release_id.is_none() {
                println!("{}", "Build is not in a release.".yellow());
                return Ok(());
            }
            let updated = service.detach_build_from_release(&build.id)?;
            println!("{} {} {}", "Build removed from release:".green(), updated.id, updated.version);
            Ok(())
        }
        ReleaseCommand::Available { release } => {
            let releases = service.releases()?;
            let release = find_release(&releases, release)?;
            let systems = service.systems()?;
            let candidates = service.unassociated_builds(&release.id)?;
            let ctx = LookupContext::new(&systems, &releases);
            let rows = project(&candidates, &ViewOptions::new(), &ctx);
            print_builds(&rows, &ctx);
            Ok(())
        }
    }
}

fn list_releases(service: &Service, args: &ListArgs) -> Result<()> {
    let releases = service.releases()?;
    let view = view_options::<Release>(args)?;
    let rows = project(&releases, &view, &LookupContext::default());

    if rows.is_empty() {
        println!("{}", "No releases found.".yellow());
        return Ok(());
    }

    println!(
        "{:<36} | {:<24} | {:<12} | {:<8} | {:<10}",
        "ID", "Name", "Status", "Type", "Date"
    );
    println!("{}", "-".repeat(102));

    for release in rows {
        println!(
            "{:<36} | {:<24} | {:<12} | {:<8} | {:<10}",
            release.id,
            truncate(&release.name, 24),
            release_status_colored(release.status),
            release.release_type.to_string(),
            fmt_date(&release.release_date)
        );
    }

    Ok(())
}

fn show_release(service: &Service, key: &str) -> Result<()> {
    let releases = service.releases()?;
    let release = service.release(&find_release(&releases, key)?.id)?;
    let systems = service.systems()?;
    let builds = service.release_builds(&release.id)?;
    let environments: Vec<Environment> = service
        .environments()?
        .into_iter()
        .filter(|e| e.release_id == release.id)
        .collect();

    println!("{}", release.name.bold());
    println!("  ID: {}", release.id);
    println!("  Status: {}", release_status_colored(release.status));
    println!("  Type: {}", release.release_type);
    println!("  Release date: {}", fmt_date(&release.release_date));
    if let Some(description) = &release.description {
        println!("  Description: {}", description);
    }
    println!("  Created: {}", fmt_date(&release.created_at));

    println!();
    println!("{}", format!("Builds ({})", builds.len()).bold());
    let ctx = LookupContext::new(&systems, &releases);
    print_builds(&project(&builds, &ViewOptions::new(), &ctx), &ctx);

    if !environments.is_empty() {
        println!();
        println!("{}", format!("Environments ({})", environments.len()).bold());
        for env in &environments {
            println!(
                "  {} [{}] {}",
                env.name,
                env.env_type,
                env_status_colored(env.status)
            );
        }
    }

    Ok(())
}

// =============================================================================
// Builds
// =============================================================================

fn handle_build_command(cmd: &BuildCommand, service: &Service) -> Result<()> {
    match cmd {
        BuildCommand::List { view } => {
            let builds = service.builds()?;
            let systems = service.systems()?;
            let releases = service.releases()?;
            let ctx = LookupContext::new(&systems, &releases);
            print_builds(&project(&builds, &view_options::<Build>(view)?, &ctx), &ctx);
            Ok(())
        }
        BuildCommand::Show { build } => {
            let builds = service.builds()?;
            let build = service.build(&find_build(&builds, build)?.id)?;
            let systems = service.systems()?;
            let releases = service.releases()?;
            let ctx = LookupContext::new(&systems, &releases);

            println!("{} {}", ctx.build_system_name(&build).bold(), build.version.bold());
            println!("  ID: {}", build.id);
            println!("  System: {}", build.system_id);
            println!("  Release: {}", ctx.build_release_name(&build));
            println!("  Build date: {}", fmt_date(&build.build_date));
            println!("  Created: {}", fmt_date(&build.created_at));
            Ok(())
        }
        BuildCommand::Add {
            system,
            version,
            date,
            release,
        } => {
            let systems = service.systems()?;
            let mut draft = match (system, version) {
                (Some(system), Some(version)) => BuildDraft {
                    system_id: find_system(&systems, system)?.id.clone(),
                    version: version.clone(),
                    build_date: match date {
                        Some(date) => parse_date(date)?,
                        None => prompts::today(),
                    },
                    release_id: None,
                },
                _ => prompts::prompt_new_build(&systems)?,
            };
            if let Some(release) = release {
                let releases = service.releases()?;
                draft.release_id = Some(find_release(&releases, release)?.id.clone());
            }
            let build = service.create_build(&draft)?;
            println!("{} {} ({})", "Build created:".green(), build.version, build.id);
            Ok(())
        }
        BuildCommand::Edit {
            build,
            version,
            date,
            release,
            no_release,
        } => {
            let builds = service.builds()?;
            let existing = find_build(&builds, build)?;
            let mut draft = existing.to_draft()?;
            if let Some(version) = version {
                draft.version = version.clone();
            }
            if let Some(date) = date {
                draft.build_date = parse_date(date)?;
            }
            if let Some(release) = release {
                let releases = service.releases()?;
                draft.release_id = Some(find_release(&releases, release)?.id.clone());
            }
            if *no_release {
                draft.release_id = None;
            }
            let updated = service.update_build(&existing.id, &draft)?;
            println!("{} {} ({})", "Build updated:".green(), updated.version, updated.id);
            Ok(())
        }
        BuildCommand::Del { build, yes } => {
            let builds = service.builds()?;
            let build = find_build(&builds, build)?;

            println!("{}", "Build to delete:".yellow());
            println!("  ID: {}", build.id);
            println!("  Version: {}", build.version);

            if confirm_delete("build", *yes)? {
                service.delete_build(&build.id)?;
                println!("{}", "Build deleted successfully!".green());
            }
            Ok(())
        }
    }
}

// =============================================================================
// Systems
// =============================================================================

fn handle_system_command(cmd: &SystemCommand, service: &Service) -> Result<()> {
    match cmd {
        SystemCommand::List { view, type_filter } => list_systems(service, view, type_filter),
        SystemCommand::Show { system } => show_system(service, system),
        SystemCommand::Add {
            name,
            r#type,
            parent,
            description,
            status,
        } => {
            let systems = service.systems()?;
            let draft = match (name, r#type) {
                (Some(name), Some(system_type)) => {
                    let mut draft = SystemDraft::new(name.clone(), parse_system_type(system_type)?);
                    if let Some(parent) = parent {
                        draft.parent_id = Some(find_system(&systems, parent)?.id.clone());
                    }
                    draft.description = description.clone();
                    if let Some(status) = status {
                        draft.status = parse_system_status(status)?;
                    }
                    draft
                }
                _ => prompts::prompt_new_system(&systems)?,
            };
            let system = service.create_system(&draft)?;
            println!(
                "{} {} {} ({})",
                "System created:".green(),
                system.system_type,
                system.name,
                system.id
            );
            Ok(())
        }
        SystemCommand::Edit {
            system,
            name,
            r#type,
            parent,
            description,
            status,
        } => {
            let systems = service.systems()?;
            let existing = find_system(&systems, system)?;
            let mut draft = existing.to_draft();
            if let Some(name) = name {
                draft.name = name.clone();
            }
            if let Some(system_type) = r#type {
                draft.system_type = parse_system_type(system_type)?;
            }
            if let Some(parent) = parent {
                draft.parent_id = Some(find_system(&systems, parent)?.id.clone());
            }
            if let Some(description) = description {
                draft.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            if let Some(status) = status {
                draft.status = parse_system_status(status)?;
            }
            let updated = service.update_system(&existing.id, &draft)?;
            println!("{} {}", "System updated:".green(), updated.name);
            Ok(())
        }
        SystemCommand::Del { system, yes } => {
            let systems = service.systems()?;
            let system = find_system(&systems, system)?;
            check_delete_system(system, &systems)?;

            println!("{}", "System to delete:".yellow());
            println!("  ID: {}", system.id);
            println!("  Name: {}", system.name);
            println!("  Type: {}", system.system_type);

            if confirm_delete("system", *yes)? {
                service.delete_system(&system.id)?;
                println!("{}", "System deleted successfully!".green());
            }
            Ok(())
        }
        SystemCommand::Tree => {
            let systems = service.systems()?;
            let tree = system_tree(&systems);
            if tree.is_empty() {
                println!("{}", "No systems found.".yellow());
                return Ok(());
            }
            for node in tree {
                let label = match node.system.system_type {
                    SystemType::ParentSystem => node.system.name.bold(),
                    SystemType::System => node.system.name.normal(),
                    SystemType::Subsystem => format!("{} (orphaned subsystem)", node.system.name).red(),
                };
                println!("{}", label);
                let count = node.children.len();
                for (i, child) in node.children.iter().enumerate() {
                    let branch = if i + 1 == count { "└─" } else { "├─" };
                    println!("  {} {} {}", branch, child.name, system_status_colored(child.status));
                }
            }
            Ok(())
        }
        SystemCommand::Subsystems { system } => {
            let systems = service.systems()?;
            let system = find_system(&systems, system)?;
            let children = service.subsystems(&system.id)?;
            if children.is_empty() {
                println!("{}", format!("{} has no subsystems.", system.name).yellow());
            }
            for child in &children {
                println!("{:<36} | {}", child.id, child.name);
            }
            Ok(())
        }
        SystemCommand::Parents { for_system } => {
            let systems = service.systems()?;
            let current = match for_system {
                Some(key) => Some(find_system(&systems, key)?.id.clone()),
                None => None,
            };
            let parents = available_parents(current.as_deref(), &systems);
            if parents.is_empty() {
                println!("{}", "No parent systems available.".yellow());
            }
            for parent in parents {
                println!("{:<36} | {}", parent.id, parent.name);
            }
            Ok(())
        }
    }
}

fn list_systems(service: &Service, args: &ListArgs, type_filter: &str) -> Result<()> {
    let systems = service.systems()?;
    let filter = TypeFilter::parse(type_filter)
        .with_context(|| format!("Invalid type filter: {}", type_filter))?;
    let view = view_options::<System>(args)?.type_filter(filter);
    let rows = project(&systems, &view, &LookupContext::default());

    let counts = system_counts(&systems);
    println!(
        "{} root, {} parent systems, {} systems, {} subsystems",
        counts.root, counts.parent_systems, counts.systems, counts.subsystems
    );

    if rows.is_empty() {
        println!("{}", "No systems found.".yellow());
        return Ok(());
    }

    println!(
        "{:<36} | {:<24} | {:<14} | {:<10} | {:<20}",
        "ID", "Name", "Type", "Status", "Parent"
    );
    println!("{}", "-".repeat(114));

    for system in rows {
        println!(
            "{:<36} | {:<24} | {:<14} | {:<10} | {:<20}",
            system.id,
            truncate(&system.name, 24),
            system.system_type.to_string(),
            system_status_colored(system.status),
            parent_name(system, &systems).unwrap_or("-")
        );
    }

    Ok(())
}

fn show_system(service: &Service, key: &str) -> Result<()> {
    let systems = service.systems()?;
    let system = service.system(&find_system(&systems, key)?.id)?;

    println!("{}", system.name.bold());
    println!("  ID: {}", system.id);
    println!("  Type: {}", system.system_type);
    println!("  Status: {}", system_status_colored(system.status));
    if let Some(parent) = parent_name(&system, &systems) {
        println!("  Parent: {}", parent);
    }
    if let Some(description) = &system.description {
        println!("  Description: {}", description);
    }

    let children = subsystems_of(&system.id, &systems);
    if !children.is_empty() {
        println!("  Subsystems:");
        for child in children {
            println!("    - {}", child.name);
        }
    }

    let builds = service.system_builds(&system.id)?;
    let releases = service.releases()?;
    let ctx = LookupContext::new(&systems, &releases);
    println!("  Builds:");
    if builds.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for build in project(&builds, &ViewOptions::new(), &ctx) {
        println!(
            "    {:<12} {:<10} {}",
            truncate(&build.version, 12),
            fmt_date(&build.build_date),
            ctx.build_release_name(build)
        );
    }
    Ok(())
}

// =============================================================================
// Environments
// =============================================================================

fn handle_env_command(cmd: &EnvCommand, service: &Service) -> Result<()> {
    match cmd {
        EnvCommand::List { view } => {
            let environments = service.environments()?;
            let releases = service.releases()?;
            let ctx = LookupContext::new(&[], &releases);
            let rows = project(&environments, &view_options::<Environment>(view)?, &ctx);

            if rows.is_empty() {
                println!("{}", "No environments found.".yellow());
                return Ok(());
            }

            println!(
                "{:<36} | {:<20} | {:<8} | {:<14} | {:<20}",
                "ID", "Name", "Type", "Status", "Release"
            );
            println!("{}", "-".repeat(108));
            for env in rows {
                println!(
                    "{:<36} | {:<20} | {:<8} | {:<14} | {:<20}",
                    env.id,
                    truncate(&env.name, 20),
                    env.env_type.to_string(),
                    env_status_colored(env.status),
                    ctx.release_name(Some(env.release_id.as_str()))
                );
            }
            Ok(())
        }
        EnvCommand::Show { env } => {
            let environments = service.environments()?;
            let env = service.environment(&find_environment(&environments, env)?.id)?;
            let releases = service.releases()?;
            let ctx = LookupContext::new(&[], &releases);

            println!("{}", env.name.bold());
            println!("  ID: {}", env.id);
            println!("  Type: {}", env.env_type);
            println!("  Status: {}", env_status_colored(env.status));
            println!("  Release: {}", ctx.release_name(Some(env.release_id.as_str())));
            if let Some(group_id) = &env.environment_group_id {
                let groups = service.environment_groups()?;
                let group = groups
                    .iter()
                    .find(|g| &g.id == group_id)
                    .map_or(group_id.as_str(), |g| g.name.as_str());
                println!("  Group: {}", group);
            }
            if let Some(url) = &env.url {
                println!("  URL: {}", url);
            }
            if let Some(description) = &env.description {
                println!("  Description: {}", description);
            }
            Ok(())
        }
        EnvCommand::Add {
            name,
            release,
            r#type,
            status,
            url,
            description,
            group,
        } => {
            let releases = service.releases()?;
            let draft = EnvironmentDraft {
                name: name.clone(),
                env_type: r#type.as_deref().map(parse_env_type).transpose()?.unwrap_or_default(),
                status: status.as_deref().map(parse_env_status).transpose()?.unwrap_or_default(),
                url: url.clone(),
                description: description.clone(),
                release_id: match release {
                    Some(release) => find_release(&releases, release)?.id.clone(),
                    None => prompts::prompt_select_release(&releases)?,
                },
                environment_group_id: match group {
                    Some(group) => Some(find_group(&service.environment_groups()?, group)?.id.clone()),
                    None => None,
                },
            };
            let env = service.create_environment(&draft)?;
            println!("{} {} ({})", "Environment created:".green(), env.name, env.id);
            Ok(())
        }
        EnvCommand::Edit {
            env,
            name,
            release,
            r#type,
            status,
            url,
            description,
            group,
        } => {
            let environments = service.environments()?;
            let existing = find_environment(&environments, env)?;
            let mut draft = existing.to_draft();
            if let Some(name) = name {
                draft.name = name.clone();
            }
            if let Some(release) = release {
                let releases = service.releases()?;
                draft.release_id = find_release(&releases, release)?.id.clone();
            }
            if let Some(env_type) = r#type {
                draft.env_type = parse_env_type(env_type)?;
            }
            if let Some(status) = status {
                draft.status = parse_env_status(status)?;
            }
            if let Some(url) = url {
                draft.url = Some(url.clone()).filter(|u| !u.is_empty());
            }
            if let Some(description) = description {
                draft.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            match group.as_deref() {
                Some("") => draft.environment_group_id = None,
                Some(group) => {
                    let groups = service.environment_groups()?;
                    draft.environment_group_id = Some(find_group(&groups, group)?.id.clone());
                }
                None => {}
            }
            let updated = service.update_environment(&existing.id, &draft)?;
            println!("{} {}", "Environment updated:".green(), updated.name);
            Ok(())
        }
        EnvCommand::Del { env, yes } => {
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;

            println!("{}", "Environment to delete:".yellow());
            println!("  ID: {}", env.id);
            println!("  Name: {}", env.name);

            if confirm_delete("environment", *yes)? {
                service.delete_environment(&env.id)?;
                println!("{}", "Environment deleted successfully!".green());
            }
            Ok(())
        }
        EnvCommand::Systems { env } => {
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;
            let deployed = service.environment_systems(&env.id)?;
            if deployed.systems.is_empty() {
                println!("{}", format!("No systems deployed in {}.", env.name).yellow());
                return Ok(());
            }
            let release_builds = service.release_builds(&env.release_id)?;

            println!(
                "{:<24} | {:<14} | {:<14} | {:<10}",
                "System", "Version", "Release build", "Status"
            );
            println!("{}", "-".repeat(70));
            for system in &deployed.systems {
                let shipped = release_version(&release_builds, &system.system_id).unwrap_or("");
                let version = if system.version == shipped {
                    or_dash(&system.version).normal()
                } else {
                    or_dash(&system.version).yellow()
                };
                println!(
                    "{:<24} | {:<14} | {:<14} | {:<10}",
                    truncate(&system.system_name, 24),
                    version,
                    or_dash(shipped),
                    deployment_status_colored(system.status)
                );
            }
            Ok(())
        }
        EnvCommand::AddSystem {
            env,
            system,
            version,
            status,
        } => {
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;
            let systems = service.systems()?;
            let system = find_system(&systems, system)?;
            let draft = DeploymentDraft {
                system_id: system.id.clone(),
                version: version.clone().filter(|v| !v.is_empty()),
                status: status.as_deref().map(parse_deployment_status).transpose()?,
            };

            let added = service.add_system_to_environment(&env.id, &draft)?;
            if added.is_empty() {
                println!(
                    "{}",
                    format!("{} is already deployed in {}.", system.name, env.name).yellow()
                );
                return Ok(());
            }
            println!(
                "{}",
                format!("Added {} system(s) to {}:", added.len(), env.name).green()
            );
            for deployed in &added {
                println!("  {} {}", deployed.system_name, or_dash(&deployed.version));
            }
            Ok(())
        }
        EnvCommand::SetSystem {
            env,
            system,
            version,
            status,
        } => {
            if version.is_none() && status.is_none() {
                anyhow::bail!("Nothing to change: pass --version or --status");
            }
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;
            let systems = service.systems()?;
            let system = find_system(&systems, system)?;
            let update = DeploymentUpdate {
                version: version.clone(),
                status: status.as_deref().map(parse_deployment_status).transpose()?,
            };
            service.update_environment_system(&env.id, &system.id, &update)?;
            println!("{} {} in {}", "Updated".green(), system.name, env.name);
            Ok(())
        }
        EnvCommand::RemoveSystem { env, system, yes } => {
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;
            let systems = service.systems()?;
            let system = find_system(&systems, system)?;

            if !*yes && !prompts::confirm(&format!("Remove {} from {}?", system.name, env.name))? {
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
            service.remove_system_from_environment(&env.id, &system.id)?;
            println!("{} {} from {}", "Removed".green(), system.name, env.name);
            Ok(())
        }
        EnvCommand::Sync { env, dry_run } => {
            let environments = service.environments()?;
            let env = find_environment(&environments, env)?;
            let drift = service.environment_drift(&env.id)?;
            if drift.is_empty() {
                println!("{}", format!("{} already matches its release.", env.name).green());
                return Ok(());
            }
            for change in &drift {
                println!(
                    "  {:<24} {} -> {}",
                    truncate(&change.system_name, 24),
                    or_dash(&change.deployed).yellow(),
                    or_dash(&change.release).green()
                );
            }
            if *dry_run {
                return Ok(());
            }
            let updated = service.sync_environment_systems(&env.id)?;
            println!("{}", format!("Updated {} system version(s).", updated).green());
            Ok(())
        }
    }
}

// =============================================================================
// Environment groups
// =============================================================================

fn group_members<'a>(group: &EnvironmentGroup, environments: &'a [Environment]) -> Vec<&'a Environment> {
    environments
        .iter()
        .filter(|e| e.environment_group_id.as_deref() == Some(group.id.as_str()))
        .collect()
}

fn handle_group_command(cmd: &GroupCommand, service: &Service) -> Result<()> {
    match cmd {
        GroupCommand::List => {
            let groups = service.environment_groups()?;
            if groups.is_empty() {
                println!("{}", "No environment groups found.".yellow());
                return Ok(());
            }
            let environments = service.environments()?;

            println!("{:<36} | {:<24} | {:<12}", "ID", "Name", "Environments");
            println!("{}", "-".repeat(78));
            for group in &groups {
                println!(
                    "{:<36} | {:<24} | {:<12}",
                    group.id,
                    truncate(&group.name, 24),
                    group_members(group, &environments).len()
                );
            }
            Ok(())
        }
        GroupCommand::Show { group } => {
            let groups = service.environment_groups()?;
            let group = service.environment_group(&find_group(&groups, group)?.id)?;
            let environments = service.environments()?;

            println!("{}", group.name.bold());
            println!("  ID: {}", group.id);
            if let Some(description) = &group.description {
                println!("  Description: {}", description);
            }
            let members = group_members(&group, &environments);
            if !members.is_empty() {
                println!("  Environments:");
                for env in members {
                    println!("    - {} ({}, {})", env.name, env.env_type, env_status_colored(env.status));
                }
            }
            Ok(())
        }
        GroupCommand::Add { name, description } => {
            let draft = EnvironmentGroupDraft {
                name: name.clone(),
                description: description.clone().filter(|d| !d.is_empty()),
            };
            let group = service.create_environment_group(&draft)?;
            println!("{} {} ({})", "Environment group created:".green(), group.name, group.id);
            Ok(())
        }
        GroupCommand::Edit {
            group,
            name,
            description,
        } => {
            let groups = service.environment_groups()?;
            let existing = find_group(&groups, group)?;
            let mut draft = existing.to_draft();
            if let Some(name) = name {
                draft.name = name.clone();
            }
            if let Some(description) = description {
                draft.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            let updated = service.update_environment_group(&existing.id, &draft)?;
            println!("{} {}", "Environment group updated:".green(), updated.name);
            Ok(())
        }
        GroupCommand::Del { group, yes } => {
            let groups = service.environment_groups()?;
            let group = find_group(&groups, group)?;
            let environments = service.environments()?;
            let members = group_members(group, &environments);
            if !members.is_empty() {
                let names: Vec<&str> = members.iter().map(|e| e.name.as_str()).collect();
                anyhow::bail!(
                    "Cannot delete environment group \"{}\" while environments belong to it ({}). \
                     Reassign or delete them first.",
                    group.name,
                    names.join(", ")
                );
            }

            println!("{}", "Environment group to delete:".yellow());
            println!("  ID: {}", group.id);
            println!("  Name: {}", group.name);

            if confirm_delete("environment group", *yes)? {
                service.delete_environment_group(&group.id)?;
                println!("{}", "Environment group deleted successfully!".green());
            }
            Ok(())
        }
    }
}
