mod commands;

use clap::{Args, Parser, Subcommand};
use socialpilot_core::{Command, InvocationRequest, Paths, Platform, SearchCriteria};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "socialpilot")]
#[command(about = "Browser automation for social platform engagement", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data directory (defaults to ~/.socialpilot or $SOCIALPILOT_HOME)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Args)]
struct AccountArgs {
    /// instagram, tiktok or x
    #[arg(short, long)]
    platform: String,

    /// Saved session name
    #[arg(short, long, default_value = "default")]
    session: String,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[derive(Args)]
struct SearchArgs {
    /// Hashtag to search, with or without '#'
    #[arg(long)]
    hashtag: Option<String>,

    /// Keyword query (used when no hashtag is given)
    #[arg(long)]
    keywords: Option<String>,

    /// Number of successful actions (or candidates for discover)
    #[arg(short = 'n', long, default_value_t = 5)]
    max_posts: usize,
}

#[derive(Args)]
struct WriteArgs {
    /// Act on this item instead of searching
    #[arg(long)]
    target_url: Option<String>,

    /// Fixed comment text
    #[arg(short, long)]
    comment: Option<String>,

    /// Generate comments with the configured model
    #[arg(long)]
    use_ai: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and save the session
    Login {
        #[command(flatten)]
        account: AccountArgs,

        #[arg(short, long)]
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Check that a saved session still logs in
    CheckSession {
        #[command(flatten)]
        account: AccountArgs,
    },

    /// Delete a saved session
    Logout {
        #[command(flatten)]
        account: AccountArgs,
    },

    /// List candidate items for a search without acting on them
    Discover {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        search: SearchArgs,
    },

    /// Discover items and comment on them
    AutoComment {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Comment on a target item or on search results
    Comment {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Like a target item or search results
    Like {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        search: SearchArgs,
        #[arg(long)]
        target_url: Option<String>,
    },

    /// Follow the author of a target item or of search results
    Follow {
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        search: SearchArgs,
        #[arg(long)]
        target_url: Option<String>,
    },

    /// Execute a JSON invocation request ('-' reads stdin)
    Run {
        /// Request JSON, or a path to a file containing it
        request: String,
    },

    /// List saved sessions
    Sessions {
        /// Limit to one platform
        #[arg(short, long)]
        platform: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl AccountArgs {
    fn request(&self, action: Command) -> anyhow::Result<InvocationRequest> {
        let mut request = InvocationRequest::new(Platform::parse(&self.platform)?, action);
        request.session_name = self.session.clone();
        request.headful = self.headful;
        Ok(request)
    }
}

impl SearchArgs {
    fn apply(&self, request: &mut InvocationRequest) {
        request.search_criteria = SearchCriteria {
            hashtag: self.hashtag.clone(),
            keywords: self.keywords.clone(),
        };
        request.max_posts = self.max_posts;
    }
}

impl WriteArgs {
    fn apply(&self, request: &mut InvocationRequest) {
        request.target_url = self.target_url.clone();
        request.comment = self.comment.clone();
        request.use_ai = self.use_ai;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base(base),
        None => Paths::new(),
    };

    let request = match cli.command {
        Commands::Login {
            account,
            username,
            password,
        } => {
            let mut request = account.request(Command::Login)?;
            request.username = Some(username);
            request.password = Some(password);
            request
        }
        Commands::CheckSession { account } => account.request(Command::CheckSession)?,
        Commands::Logout { account } => account.request(Command::Logout)?,
        Commands::Discover { account, search } => {
            let mut request = account.request(Command::Discover)?;
            search.apply(&mut request);
            request
        }
        Commands::AutoComment {
            account,
            search,
            write,
        } => {
            let mut request = account.request(Command::AutoComment)?;
            search.apply(&mut request);
            write.apply(&mut request);
            request
        }
        Commands::Comment {
            account,
            search,
            write,
        } => {
            let mut request = account.request(Command::Comment)?;
            search.apply(&mut request);
            write.apply(&mut request);
            request
        }
        Commands::Like {
            account,
            search,
            target_url,
        } => {
            let mut request = account.request(Command::Like)?;
            search.apply(&mut request);
            request.target_url = target_url;
            request
        }
        Commands::Follow {
            account,
            search,
            target_url,
        } => {
            let mut request = account.request(Command::Follow)?;
            search.apply(&mut request);
            request.target_url = target_url;
            request
        }
        Commands::Run { request } => commands::run_cmd::parse_request(&request)?,
        Commands::Sessions { platform } => {
            return commands::sessions::list(&paths, platform.as_deref());
        }
        Commands::Config { command } => {
            return match command {
                ConfigCommands::Show => commands::config_cmd::show(&paths),
                ConfigCommands::Init { force } => commands::config_cmd::init(&paths, force),
            };
        }
    };

    commands::run_cmd::execute(paths, request).await
}
