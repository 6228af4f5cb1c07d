// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

use comet_guard::auth::{AuthService, LoginForm, MemberStore};
use comet_guard::config::{self, GuardConfig};
use comet_guard::error::AuthError;
use comet_guard::security::{
    bind_to_auth, detect_sql_injection, detect_xss, generate_csrf_token, is_valid_email,
    sanitize_input, ActivityBus, ActivityKind, AttemptRateLimiter, MonitorConfig, MonitorHooks,
    PwnedPasswordClient, SessionActivityMonitor, SessionStatus,
};
use comet_guard::utils::mask_identifier;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Credentials or form input rejected
    pub const AUTH_FAILED: i32 = 1;
    /// Locked out - try again later
    pub const TEMP_FAIL: i32 = 75;
}

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn finish_success(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[32m[OK]\x1b[0m {}", message);
    }

    pub fn finish_warning(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[33m[!]\x1b[0m {}", message);
    }

    pub fn clear(spinner: &ProgressBar) {
        spinner.finish_and_clear();
    }
}

/// comet-guard - session and sign-in protection for the Comet member area.
#[derive(Parser)]
#[command(name = "comet-guard")]
#[command(version = VERSION)]
#[command(about = "Session inactivity monitor and login attempt limiter for CrossFit Comet.")]
#[command(long_about = "comet-guard - member area security core\n\n\
    Sign in:             comet-guard login --email you@comet.fit --password ...\n\
    Watch the session:   comet-guard watch\n\
    Who is signed in:    comet-guard whoami\n\
    Check a password:    comet-guard check-password <PASSWORD>\n\
    Configure:           comet-guard config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: only errors are logged
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: log every session reset
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the signed-in session for inactivity
    ///
    /// Every line typed counts as activity. Type `extend` to stay signed in
    /// or `logout` to sign out now.
    ///
    /// Examples:
    ///   comet-guard watch
    ///   comet-guard watch --timeout 60 --warning 15
    Watch {
        /// Inactivity timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Warning lead time in seconds
        #[arg(long)]
        warning: Option<u64>,
    },

    /// Sign in as a member
    ///
    /// Example:
    ///   comet-guard login --email you@comet.fit --password hunter22
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Create a trial membership and sign in
    ///
    /// Example:
    ///   comet-guard signup --email you@comet.fit --password hunter22 --name Sam
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
    },

    /// Sign out
    Logout,

    /// Show the stored member and whether they are signed in
    Whoami,

    /// Look a password up in known breaches (advisory)
    CheckPassword {
        password: String,
    },

    /// Show what the input helpers make of some text
    ///
    /// Example:
    ///   comet-guard inspect "<script>alert(1)</script>"
    Inspect {
        text: String,
    },

    /// Print a fresh CSRF token
    Token,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print the config file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = config::load_config().context("Failed to load configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: GuardConfig) -> Result<()> {
    match command {
        Commands::Watch { timeout, warning } => handle_watch(&config, timeout, warning).await,
        Commands::Login { email, password } => handle_login(&config, email, password),
        Commands::Signup { email, password, name } => {
            handle_signup(&config, email, password, name).await
        }
        Commands::Logout => handle_logout(&config),
        Commands::Whoami => handle_whoami(&config),
        Commands::CheckPassword { password } => handle_check_password(&config, &password).await,
        Commands::Inspect { text } => {
            handle_inspect(&text);
            Ok(())
        }
        Commands::Token => {
            println!("{}", generate_csrf_token());
            Ok(())
        }
        Commands::Config { command } => handle_config(&config, command.unwrap_or(ConfigCommands::Show)),
    }
}

fn open_service(config: &GuardConfig) -> Result<AuthService> {
    let data_dir = config.resolved_data_dir()?;
    let store = MemberStore::in_dir(&data_dir);
    let limiter = Arc::new(AttemptRateLimiter::new(config.rate_limit.clone()));
    let pwned = config
        .pwned
        .enabled
        .then(|| PwnedPasswordClient::new(&config.pwned));

    AuthService::new(store, limiter, pwned)
        .with_context(|| format!("Failed to open member store in {}", data_dir.display()))
}

/// Print a rejected sign-in and exit; system failures propagate instead.
fn exit_on_user_error(err: AuthError) -> anyhow::Error {
    if !err.is_user_error() {
        return err.into();
    }
    eprintln!("{} {}", "[X]".red(), err);
    let code = match err {
        AuthError::LockedOut { .. } => exit_codes::TEMP_FAIL,
        _ => exit_codes::AUTH_FAILED,
    };
    std::process::exit(code);
}

fn handle_login(config: &GuardConfig, email: String, password: String) -> Result<()> {
    let service = open_service(config)?;
    let profile = service
        .sign_in(&LoginForm::login(email, password))
        .map_err(exit_on_user_error)?;

    println!(
        "{} Welcome back, {} ({} membership)",
        "[OK]".green(),
        profile.name.bold(),
        profile.membership
    );
    Ok(())
}

async fn handle_signup(
    config: &GuardConfig,
    email: String,
    password: String,
    name: String,
) -> Result<()> {
    let service = open_service(config)?;
    let form = LoginForm::signup(email, password, name);

    let spinner = spinner::create("Creating your membership...");
    let result = service.sign_up(&form).await;
    spinner::clear(&spinner);
    let outcome = result.map_err(exit_on_user_error)?;

    println!(
        "{} Welcome to CrossFit Comet, {}! Your {} membership is active.",
        "[OK]".green(),
        outcome.profile.name.bold(),
        outcome.profile.membership
    );
    if outcome.breach.compromised {
        println!(
            "{} This password has appeared in {} known breaches. Consider changing it.",
            "[!]".yellow(),
            outcome.breach.count.unwrap_or_default()
        );
    }
    Ok(())
}

fn handle_logout(config: &GuardConfig) -> Result<()> {
    let service = open_service(config)?;
    if !service.is_authenticated() {
        println!("{} Not signed in", "[i]".cyan());
        return Ok(());
    }
    service.logout()?;
    println!("{} Signed out", "[OK]".green());
    Ok(())
}

fn handle_whoami(config: &GuardConfig) -> Result<()> {
    let service = open_service(config)?;
    let Some(member) = service.current_member()? else {
        println!("{} No member on this device. Run `comet-guard signup` first.", "[i]".cyan());
        return Ok(());
    };

    let state = if service.is_authenticated() {
        "signed in".green()
    } else {
        "signed out".yellow()
    };
    println!("{} ({})", member.name.bold(), state);
    println!("  Email:      {}", member.email);
    println!("  Membership: {}", member.membership);
    println!("  Joined:     {}", member.join_date.format("%Y-%m-%d"));
    Ok(())
}

async fn handle_check_password(config: &GuardConfig, password: &str) -> Result<()> {
    let client = PwnedPasswordClient::new(&config.pwned);

    let spinner = spinner::create("Checking known breaches...");
    let check = client.check(password).await;

    if check.compromised {
        spinner::finish_warning(
            &spinner,
            &format!(
                "Found in {} known breaches",
                check.count.unwrap_or_default()
            ),
        );
    } else {
        spinner::finish_success(&spinner, "Not found in known breaches");
    }
    Ok(())
}

fn handle_inspect(text: &str) {
    let flag = |hit: bool| if hit { "yes".red() } else { "no".green() };

    println!("Sanitized:      {}", sanitize_input(text));
    println!(
        "Valid email:    {}",
        if is_valid_email(text.trim()) { "yes".green() } else { "no".yellow() }
    );
    println!("SQL injection:  {}", flag(detect_sql_injection(text)));
    println!("XSS:            {}", flag(detect_xss(text)));
}

fn handle_config(config: &GuardConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommands::Path => {
            println!("{}", config::config_path()?.display());
        }
        ConfigCommands::Init { force } => {
            let path = config::config_path()?;
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            config::save_config(&GuardConfig::default(), &path)?;
            println!("{} Wrote {}", "[OK]".green(), path.display());
        }
    }
    Ok(())
}

async fn handle_watch(
    config: &GuardConfig,
    timeout: Option<u64>,
    warning: Option<u64>,
) -> Result<()> {
    let session = match (timeout, warning) {
        (None, None) => config.session.clone(),
        (timeout, warning) => MonitorConfig::custom(
            timeout.unwrap_or(config.session.timeout_secs),
            warning.unwrap_or(config.session.warning_lead_secs),
        )
        .with_signals(&config.session.signals),
    };

    let service = Arc::new(open_service(config)?);
    let Some(member) = service.current_member()?.filter(|_| service.is_authenticated()) else {
        bail!("Not signed in. Run `comet-guard login` first.");
    };

    let bus = Arc::new(ActivityBus::new());
    let hooks = MonitorHooks::from_logout_fn(service.logout_action())
        .on_warning(|| println!("\n{} Your session is about to expire.", "[!]".yellow()))
        .on_timeout(|| println!("\n{} Session expired after inactivity.", "[X]".red()));
    let monitor = SessionActivityMonitor::new(session, hooks, bus.clone());
    let binding = bind_to_auth(monitor.clone(), service.auth_state());

    println!(
        "{} Watching session for {} (timeout {}s, warning {}s before)",
        "[OK]".green(),
        mask_identifier(&member.email, 2),
        monitor.config().timeout_secs,
        monitor.config().warning_lead_secs
    );
    println!("    Type anything to stay active, `extend` to extend, `logout` to sign out.");

    let mut status = monitor.subscribe_status();
    let mut auth = service.auth_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = WatchView::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "extend" => {
                        monitor.extend_session();
                        println!("{} Session extended", "[OK]".green());
                    }
                    "logout" => {
                        if let Err(e) = monitor.logout_now().await {
                            eprintln!("{} Logout failed: {}", "[X]".red(), e);
                        }
                    }
                    _ => {
                        bus.emit(ActivityKind::KeyPress);
                    }
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                view.render(&snapshot);
            }
            changed = auth.changed() => {
                if changed.is_err() || !*auth.borrow_and_update() {
                    println!("{} Signed out", "[OK]".green());
                    break;
                }
            }
        }
    }

    monitor.disable();
    binding.abort();
    Ok(())
}

/// What the watch loop has already put on screen.
#[derive(Default)]
struct WatchView {
    warning_shown: bool,
    last_error: Option<String>,
}

impl WatchView {
    fn render(&mut self, status: &SessionStatus) {
        if status.warning_visible {
            print!(
                "\r{} Session expires in {} - press Enter to stay signed in ",
                "[!]".yellow(),
                status.remaining_formatted().bold()
            );
            std::io::stdout().flush().ok();
        } else if self.warning_shown {
            println!();
        }
        self.warning_shown = status.warning_visible;

        if status.last_logout_error != self.last_error {
            if let Some(error) = &status.last_logout_error {
                eprintln!("{} Logout failed: {}", "[X]".red(), error);
            }
            self.last_error = status.last_logout_error.clone();
        }
    }
}
