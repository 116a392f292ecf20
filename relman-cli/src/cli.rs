use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Release, build and system inventory")]
pub struct Cli {
    /// Profile name from the config file
    #[clap(long, short = 'p', global = true)]
    pub profile: Option<String>,

    /// More log output (-v info, -vv debug)
    #[clap(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Command,
}

/// Search, sort and filter options shared by list commands
#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Case-insensitive text search
    #[clap(long)]
    pub search: Option<String>,

    /// Column to sort by
    #[clap(long)]
    pub sort: Option<String>,

    /// Sort descending
    #[clap(long, conflicts_with = "asc")]
    pub desc: bool,

    /// Sort ascending (default)
    #[clap(long)]
    pub asc: bool,

    /// Column filter, repeatable
    #[clap(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the session token in the profile
    Login {
        #[clap(long)]
        email: Option<String>,
    },

    /// Create an account and store its session token
    Register {
        #[clap(long)]
        email: Option<String>,
    },

    /// Forget the stored session token
    Logout,

    /// Show the user the stored session belongs to
    Whoami,

    /// Manage server profiles
    #[clap(subcommand)]
    Profile(ProfileCommand),

    /// Manage releases and their builds
    #[clap(subcommand)]
    Release(ReleaseCommand),

    /// Manage builds
    #[clap(subcommand)]
    Build(BuildCommand),

    /// Manage systems and subsystems
    #[clap(subcommand)]
    System(SystemCommand),

    /// Manage deployment environments
    #[clap(subcommand)]
    Env(EnvCommand),

    /// Manage environment groups
    #[clap(subcommand)]
    Group(GroupCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Add or update a profile
    Add {
        name: String,

        /// API root (http:// or https://) or local snapshot (file://)
        #[clap(long)]
        url: String,

        #[clap(long)]
        description: Option<String>,

        /// HTTP request timeout in seconds (default 30)
        #[clap(long)]
        timeout: Option<u64>,

        /// Make this the default profile
        #[clap(long)]
        default: bool,
    },

    /// List profiles
    List,

    /// Set the default profile
    Use { name: String },
}

#[derive(Subcommand, Debug)]
pub enum ReleaseCommand {
    /// List releases (sort: name, status, type, release_date, created_at;
    /// filter: type, status)
    List {
        #[clap(flatten)]
        view: ListArgs,
    },

    /// Show a release with its builds
    Show {
        /// Release id or name
        release: String,
    },

    /// Add a release; prompts when --name is omitted
    Add {
        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        description: Option<String>,

        /// Release date (YYYY-MM-DD)
        #[clap(long)]
        date: Option<String>,

        #[clap(long)]
        status: Option<String>,

        /// Major, Minor or Hotfix
        #[clap(long)]
        r#type: Option<String>,
    },

    /// Edit a release
    Edit {
        /// Release id or name
        release: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        description: Option<String>,

        /// Release date (YYYY-MM-DD)
        #[clap(long)]
        date: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        r#type: Option<String>,
    },

    /// Delete a release
    Del {
        /// Release id or name
        release: String,

        /// Skip confirmation
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// List the builds in a release
    Builds {
        /// Release id or name
        release: String,

        #[clap(flatten)]
        view: ListArgs,
    },

    /// Add a build to a release; prompts for the build when omitted
    Attach {
        /// Release id or name
        release: String,

        /// Build id
        build: Option<String>,
    },

    /// Take a build out of its release
    Detach {
        /// Build id
        build: String,
    },

    /// List builds that could be added to a release
    Available {
        /// Release id or name
        release: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BuildCommand {
    /// List builds (sort: system, version, release, build_date, created_at;
    /// filter: system, release)
    List {
        #[clap(flatten)]
        view: ListArgs,
    },

    /// Show a build
    Show { build: String },

    /// Add a build; prompts when --system or --version is omitted
    Add {
        /// System id or name
        #[clap(long)]
        system: Option<String>,

        #[clap(long)]
        version: Option<String>,

        /// Build date (YYYY-MM-DD, default today)
        #[clap(long)]
        date: Option<String>,

        /// Release id or name
        #[clap(long)]
        release: Option<String>,
    },

    /// Edit a build's version, date or release
    Edit {
        build: String,

        #[clap(long)]
        version: Option<String>,

        /// Build date (YYYY-MM-DD)
        #[clap(long)]
        date: Option<String>,

        /// Release id or name
        #[clap(long, conflicts_with = "no_release")]
        release: Option<String>,

        /// Remove the build from its release
        #[clap(long)]
        no_release: bool,
    },

    /// Delete a build
    Del {
        build: String,

        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SystemCommand {
    /// List systems (sort: name, type, status, created_at;
    /// filter: name, type, status, parent)
    List {
        #[clap(flatten)]
        view: ListArgs,

        /// root, all, parent_systems, systems or subsystems
        #[clap(long = "type", default_value = "root")]
        type_filter: String,
    },

    /// Show a system
    Show { system: String },

    /// Add a system; prompts when --name or --type is omitted
    Add {
        #[clap(long)]
        name: Option<String>,

        /// parent_systems, systems or subsystems
        #[clap(long)]
        r#type: Option<String>,

        /// Parent system id or name (subsystems only)
        #[clap(long)]
        parent: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        status: Option<String>,
    },

    /// Edit a system
    Edit {
        system: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        r#type: Option<String>,

        #[clap(long)]
        parent: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        status: Option<String>,
    },

    /// Delete a system without subsystems
    Del {
        system: String,

        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Show parent systems with their subsystems
    Tree,

    /// List the subsystems of a system
    Subsystems { system: String },

    /// List systems that can be chosen as a parent
    Parents {
        /// System being edited, excluded with its descendants
        #[clap(long = "for")]
        for_system: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// List environments (sort: name, type, status, created_at;
    /// filter: type, status, release)
    List {
        #[clap(flatten)]
        view: ListArgs,
    },

    /// Show an environment
    Show { env: String },

    /// Add an environment; prompts for the release when omitted
    Add {
        #[clap(long)]
        name: String,

        /// Release id or name
        #[clap(long)]
        release: Option<String>,

        /// dev, staging or prod
        #[clap(long)]
        r#type: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        url: Option<String>,

        #[clap(long)]
        description: Option<String>,

        /// Environment group id or name
        #[clap(long)]
        group: Option<String>,
    },

    /// Edit an environment
    Edit {
        env: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        release: Option<String>,

        #[clap(long)]
        r#type: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        url: Option<String>,

        #[clap(long)]
        description: Option<String>,

        /// Environment group id or name; empty removes the group
        #[clap(long)]
        group: Option<String>,
    },

    /// Delete an environment
    Del {
        env: String,

        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// List the systems deployed in an environment
    Systems { env: String },

    /// Deploy a system; a parent system deploys all its subsystems
    AddSystem {
        env: String,

        /// System id or name
        system: String,

        /// Version to deploy (default: the release's build)
        #[clap(long)]
        version: Option<String>,

        /// active or inactive
        #[clap(long)]
        status: Option<String>,
    },

    /// Change the version or status of a deployed system
    SetSystem {
        env: String,

        system: String,

        #[clap(long)]
        version: Option<String>,

        #[clap(long)]
        status: Option<String>,
    },

    /// Take a system out of an environment
    RemoveSystem {
        env: String,

        system: String,

        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Reset deployed versions to the environment's release
    Sync {
        env: String,

        /// Only show what would change
        #[clap(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// List environment groups
    List,

    /// Show a group with its environments
    Show { group: String },

    /// Add a group
    Add {
        #[clap(long)]
        name: String,

        #[clap(long)]
        description: Option<String>,
    },

    /// Edit a group
    Edit {
        group: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        description: Option<String>,
    },

    /// Delete a group no environment belongs to
    Del {
        group: String,

        #[clap(long, short = 'y')]
        yes: bool,
    },
}
