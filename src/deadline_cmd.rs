//! One-shot CLI commands: list, add, remove, watch, menu.

use crate::alert::{
    AlertLoop, AlertSink, CancellationToken, Clock, FanoutAlert, FixedClock, SystemClock,
};
use crate::collection::DeadlineCollection;
use crate::config::AlertConfig;
use crate::deadline::{parse_zone, DeadlineRecord};
use crate::menu::Session;
use crate::store::DeadlineStore;
use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use clap::ValueEnum;
use log::info;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ListFormat {
    /// `ID: MM/DD/YYYY - HH:MM` per line
    #[default]
    Text,
    /// JSON array with id, local time and authoring zone
    Json,
}

#[derive(Debug, Serialize)]
struct ListEntry {
    id: usize,
    local: String,
    date_time: String,
    tz: String,
}

fn load_collection(store: &DeadlineStore, local_zone: Tz) -> Result<DeadlineCollection> {
    let (doc, _) = store.load()?;
    Ok(DeadlineCollection::from_document(&doc, local_zone)?)
}

pub fn run_list(store: &DeadlineStore, local_zone: Tz, format: ListFormat) -> Result<()> {
    let collection = load_collection(store, local_zone)?;
    match format {
        ListFormat::Text => {
            if collection.is_empty() {
                println!("No deadlines.");
            }
            for (id, formatted) in collection.list_entries() {
                println!("{}: {}", id, formatted);
            }
        }
        ListFormat::Json => {
            let entries: Vec<ListEntry> = collection
                .list_entries()
                .into_iter()
                .zip(collection.to_document().deadlines)
                .map(|((id, local), raw)| ListEntry {
                    id,
                    local,
                    date_time: raw.date_time,
                    tz: raw.tz,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

pub fn run_add(
    store: &DeadlineStore,
    local_zone: Tz,
    date_time: &str,
    tz: Option<&str>,
    yes: bool,
) -> Result<()> {
    let zone = match tz {
        Some(label) => parse_zone(label)?,
        None => local_zone,
    };
    let record = DeadlineRecord::from_wall_clock(date_time, zone, local_zone)?;
    let mut collection = load_collection(store, local_zone)?;

    let question = format!("Add deadline {} ({})?", date_time.trim(), zone.name());
    if !yes && !confirm_stdin(&question)? {
        println!("Cancelled.");
        return Ok(());
    }

    collection.add(record);
    store
        .save(&collection.to_document())
        .context("Failed to add deadline")?;
    info!(
        "deadline.add date_time=\"{}\" tz={} count={}",
        date_time.trim(),
        zone.name(),
        collection.len()
    );
    println!("Added deadline {}.", collection.len());
    Ok(())
}

pub fn run_remove(store: &DeadlineStore, local_zone: Tz, id: &str, yes: bool) -> Result<()> {
    let mut collection = load_collection(store, local_zone)?;
    let removed = collection.remove_index_text(id)?;

    let question = format!("Remove deadline {}?", removed.formatted());
    if !yes && !confirm_stdin(&question)? {
        println!("Cancelled.");
        return Ok(());
    }

    store
        .save(&collection.to_document())
        .context("Failed to remove deadline")?;
    info!(
        "deadline.remove id={} count={}",
        id.trim(),
        collection.len()
    );
    println!("Removed deadline {}.", removed.formatted());
    Ok(())
}

pub struct WatchArgs<'a> {
    pub interval: Duration,
    pub once: bool,
    /// Stop watching after this long instead of running until interrupted.
    pub stop_after: Option<Duration>,
    /// Simulated local wall-clock reading instead of the system clock.
    pub at: Option<&'a str>,
}

pub fn run_watch(
    store: &DeadlineStore,
    local_zone: Tz,
    alert: &AlertConfig,
    args: WatchArgs<'_>,
) -> Result<()> {
    let sink = FanoutAlert::from_config(alert);
    match args.at {
        Some(at) => {
            let instant = DeadlineRecord::from_wall_clock(at, local_zone, local_zone)?
                .instant()
                .with_timezone(&Utc);
            let alerts = AlertLoop::new(
                store.clone(),
                local_zone,
                FixedClock(instant),
                sink,
                args.interval,
            )?;
            drive(alerts, args.once, args.stop_after)
        }
        None => {
            let alerts =
                AlertLoop::new(store.clone(), local_zone, SystemClock, sink, args.interval)?;
            drive(alerts, args.once, args.stop_after)
        }
    }
}

fn drive<C: Clock, S: AlertSink>(
    mut alerts: AlertLoop<C, S>,
    once: bool,
    stop_after: Option<Duration>,
) -> Result<()> {
    if once {
        let report = alerts.tick()?;
        info!(
            "deadline.watch once now=\"{}\" fired={} remaining={}",
            report.now,
            report.fired,
            alerts.collection().len()
        );
        return Ok(());
    }
    let cancel = CancellationToken::new();
    if let Some(limit) = stop_after {
        let timer = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(limit);
            timer.cancel();
        });
    }
    // Without a limit this runs until the process is interrupted.
    let summary = alerts.run(&cancel);
    info!(
        "deadline.watch ticks={} fired={} failed_ticks={}",
        summary.ticks, summary.fired, summary.failed_ticks
    );
    Ok(())
}

/// Interactive menu. Nothing cancels its token, so choosing "watch" keeps
/// alerting until the process is interrupted.
pub fn run_menu(store: &DeadlineStore, local_zone: Tz, alert: &AlertConfig) -> Result<()> {
    let stdin = io::stdin();
    let mut session = Session::new(
        store.clone(),
        local_zone,
        alert.clone(),
        CancellationToken::new(),
        stdin.lock(),
        io::stdout(),
    )?;
    session.run()
}

/// Y/N prompt on stdin. End of input counts as "no".
fn confirm_stdin(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        print!("{} (Y/N): ", question);
        io::stdout().flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim().to_ascii_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            _ => println!("Please answer Y or N."),
        }
    }
}
