mod alert;
mod atomic_write;
mod collection;
mod config;
mod deadline;
mod deadline_cmd;
mod error;
mod logging;
mod menu;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "deadlines",
    version,
    about = "Personal deadline reminder",
    long_about = "Keeps a local list of deadlines and raises a one-shot alert when the clock reaches one. Run without a subcommand for the interactive menu."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Deadline file (default: config `[store] path`, then the user data dir)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// IANA time zone treated as local (default: config `[time] zone`, then the host zone)
    #[arg(long, global = true)]
    zone: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List deadlines in display order
    List {
        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: deadline_cmd::ListFormat,
    },

    /// Add a deadline
    Add {
        /// Date and time as "MM/DD/YYYY - HH:MM" (24-hour)
        date_time: String,

        /// IANA zone the date is written in (defaults to the local zone)
        #[arg(long)]
        tz: Option<String>,

        /// Skip the Y/N confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove a deadline by its list ID
    Remove {
        /// 1-based ID as shown by `list`
        id: String,

        /// Skip the Y/N confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Poll the clock and alert when a deadline arrives
    Watch {
        /// Poll interval in milliseconds (default: config `[alert] poll_interval_ms`)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Check once and exit
        #[arg(long)]
        once: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Pretend the local time is "MM/DD/YYYY - HH:MM"
        #[arg(long, hide = true)]
        at: Option<String>,
    },

    /// Interactive menu (default)
    Menu,

    /// Show or create the config file
    Config {
        /// Create default config file
        #[arg(long)]
        create: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = run(cli) {
        debug!("main.error {:?}", err);
        match error::find_deadline_error(&err) {
            Some(typed) => eprintln!("Error: {}", typed.user_message()),
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = config::Config::load()?;
    let open_store = || -> Result<(chrono_tz::Tz, store::DeadlineStore)> {
        let zone_override = cli.zone.as_deref().or(cfg.time.zone.as_deref());
        let local_zone = deadline::resolve_local_zone(zone_override)?;
        let store =
            store::DeadlineStore::new(cfg.store_path(cli.file.as_deref()), cfg.write_options());
        debug!(
            "main.start store={} zone={}",
            store.path().display(),
            local_zone.name()
        );
        Ok((local_zone, store))
    };

    match cli.command.as_ref().unwrap_or(&Commands::Menu) {
        Commands::List { format } => {
            let (zone, store) = open_store()?;
            deadline_cmd::run_list(&store, zone, *format)?;
        }

        Commands::Add {
            date_time,
            tz,
            yes,
        } => {
            let (zone, store) = open_store()?;
            deadline_cmd::run_add(&store, zone, date_time, tz.as_deref(), *yes)?;
        }

        Commands::Remove { id, yes } => {
            let (zone, store) = open_store()?;
            deadline_cmd::run_remove(&store, zone, id, *yes)?;
        }

        Commands::Watch {
            interval_ms,
            once,
            duration_secs,
            at,
        } => {
            let (zone, store) = open_store()?;
            let interval = interval_ms
                .map(|ms| Duration::from_millis(ms.max(10)))
                .unwrap_or_else(|| cfg.alert.poll_interval());
            let args = deadline_cmd::WatchArgs {
                interval,
                once: *once,
                stop_after: duration_secs.map(Duration::from_secs),
                at: at.as_deref(),
            };
            deadline_cmd::run_watch(&store, zone, &cfg.alert, args)?;
        }

        Commands::Menu => {
            let (zone, store) = open_store()?;
            deadline_cmd::run_menu(&store, zone, &cfg.alert)?;
        }

        Commands::Config { create } => {
            if *create {
                let path = config::Config::create_default()?;
                println!("Created: {}", path.display());
            } else {
                config::show_config()?;
            }
        }
    }

    Ok(())
}
