use clap::{Parser, Subcommand};
use lib::{Message, Messenger};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Parser)]
#[command(name = "dsu")]
#[command(about = "DSU messenger CLI", long_about = None)]
struct Cli {
    /// Config file path (default: DSU_CONFIG_PATH or ~/.dsu/config.json)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Profile file (default: profile.path from config)
    #[arg(long, short, value_name = "FILE", global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the profiles directory.
    Init,

    /// Create a new profile file. Blank username/password fall back to the default account.
    Create {
        #[arg(long, short, default_value = "")]
        username: String,
        #[arg(long, default_value = "")]
        password: String,
    },

    /// List contacts with their selection tokens.
    Contacts,

    /// Add a contact to the profile.
    AddContact { username: String },

    /// Print the conversation with a contact.
    History { contact: String },

    /// Send a message to a contact.
    Send {
        #[arg(long, short)]
        to: String,
        message: String,
    },

    /// Retrieve new messages once and store them in the profile.
    Sync,

    /// Retrieve the full server-side history and merge it into the profile.
    Resync,

    /// Interactive chat: background sync plus a prompt that sends to the selected contact.
    Chat {
        /// Contact (or selection token) to select on start.
        #[arg(long)]
        with: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("dsu {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(cli.config),
        Some(command) => run_profile_command(cli.config, cli.profile, command).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let profiles = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("profiles directory: {}", profiles.display());
    Ok(())
}

async fn run_profile_command(
    config_path: Option<PathBuf>,
    profile: Option<PathBuf>,
    command: Commands,
) -> anyhow::Result<()> {
    let (config, config_path) = lib::config::load_config(config_path)?;
    let profile = profile
        .or_else(|| lib::config::resolve_profile_path(&config, &config_path))
        .ok_or_else(|| anyhow::anyhow!("no profile given; pass --profile or set profile.path in {}", config_path.display()))?;

    let command = match command {
        Commands::Chat { with } => return run_chat(&config, profile, with).await,
        other => other,
    };

    let messenger = Messenger::from_config(&config).with_auto_sync(false);
    if let Commands::Create { username, password } = &command {
        messenger.create(&profile, username, password).await?;
        println!(
            "created profile {} for {}",
            profile.display(),
            messenger.username().await?
        );
        return Ok(());
    }
    messenger.open(&profile).await?;

    match command {
        Commands::Contacts => {
            for (token, contact) in messenger.contact_entries().await? {
                println!("{}  {}", token, contact);
            }
        }
        Commands::AddContact { username } => {
            if messenger.add_contact(&username).await? {
                println!("added {}", username.trim());
            } else {
                println!("{} is already a contact", username.trim());
            }
        }
        Commands::History { contact } => {
            let me = messenger.username().await?;
            for m in messenger.history(&contact).await? {
                println!("{}", format_message(&me, &m));
            }
        }
        Commands::Send { to, message } => {
            let sent = messenger.send_to(&to, &message).await?;
            println!("sent to {}", sent.recipient);
        }
        Commands::Sync => {
            let report = messenger.sync_now().await?;
            println!("{} retrieved, {} new", report.retrieved, report.added);
        }
        Commands::Resync => {
            let report = messenger.resync().await?;
            println!("{} on server, {} new", report.retrieved, report.added);
        }
        Commands::Version | Commands::Init | Commands::Create { .. } | Commands::Chat { .. } => {}
    }
    messenger.close().await;
    Ok(())
}

fn format_message(me: &str, m: &Message) -> String {
    let when = local_time(m.timestamp);
    if m.sender == me {
        format!("[{}] > {}: {}", when, m.recipient, m.body)
    } else {
        format!("[{}] < {}: {}", when, m.sender, m.body)
    }
}

fn local_time(ts: f64) -> String {
    chrono::DateTime::from_timestamp(ts.trunc() as i64, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Prints messages of the selected conversation that were not printed yet.
#[derive(Default)]
struct Printed {
    contact: String,
    count: usize,
}

async fn run_chat(config: &lib::config::Config, profile: PathBuf, with: Option<String>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let printed = Arc::new(Mutex::new(Printed::default()));
    let me = Arc::new(Mutex::new(String::new()));
    let (sink, me_sink) = (printed.clone(), me.clone());
    let messenger = Messenger::from_config(config).with_refresh(Arc::new(move |contact: &str, history: &[Message]| {
        let mut p = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if p.contact != contact {
            return;
        }
        let me = me_sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for m in history.iter().skip(p.count) {
            println!("\r{}", format_message(&me, m));
        }
        p.count = p.count.max(history.len());
    }));
    messenger.open(&profile).await?;
    *me.lock().unwrap_or_else(PoisonError::into_inner) = messenger.username().await?;

    if let Some(target) = with {
        select(&messenger, &printed, &me, &target).await;
    }
    println!("commands: /contacts, /add NAME, /select NAME|TOKEN, /quit");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let line = {
            let mut line = String::new();
            let read = tokio::task::block_in_place(|| stdin.read_line(&mut line))?;
            if read == 0 {
                break;
            }
            line
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input == "/contacts" {
            for (token, contact) in messenger.contact_entries().await? {
                println!("{}  {}", token, contact);
            }
        } else if let Some(name) = input.strip_prefix("/add ") {
            match messenger.add_contact(name).await {
                Ok(true) => println!("added {}", name.trim()),
                Ok(false) => println!("{} is already a contact", name.trim()),
                Err(e) => eprintln!("add failed: {}", e),
            }
        } else if let Some(target) = input.strip_prefix("/select ") {
            select(&messenger, &printed, &me, target.trim()).await;
        } else {
            match messenger.send(input).await {
                Ok(_) => {
                    let mut p = printed.lock().unwrap_or_else(PoisonError::into_inner);
                    p.count += 1;
                }
                Err(e) => eprintln!("send failed: {}", e),
            }
        }
    }

    messenger.close().await;
    Ok(())
}

async fn select(messenger: &Messenger, printed: &Mutex<Printed>, me: &Mutex<String>, target: &str) {
    let selected = match messenger.select(target).await {
        Ok(history) => Ok((target.to_string(), history)),
        Err(lib::ClientError::UnknownContact(_)) => messenger.select_token(target).await,
        Err(e) => Err(e),
    };
    match selected {
        Ok((contact, history)) => {
            let me = me.lock().unwrap_or_else(PoisonError::into_inner).clone();
            println!("-- {} --", contact);
            for m in &history {
                println!("{}", format_message(&me, m));
            }
            let mut p = printed.lock().unwrap_or_else(PoisonError::into_inner);
            p.contact = contact;
            p.count = history.len();
        }
        Err(e) => eprintln!("select failed: {}", e),
    }
}
