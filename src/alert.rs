//! Alert loop: poll the wall clock, fire each due deadline once, drop it.
//!
//! Matching is exact string equality on the minute-granular format. A
//! deadline whose minute passes without a tick is not fired late.

use crate::collection::DeadlineCollection;
use crate::config::AlertConfig;
use crate::deadline::{format_instant, DeadlineRecord};
use crate::error::find_deadline_error;
use crate::store::{DeadlineStore, StoreToken};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use colored::Colorize;
use log::{debug, info, warn};
use std::io::{self, Write};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CANCEL_POLL_SLICE: Duration = Duration::from_millis(50);

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant; backs `watch --at`.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Where a fired deadline is announced. Delivery is best-effort.
pub trait AlertSink {
    fn alert(&mut self, record: &DeadlineRecord) -> Result<()>;
}

pub fn alert_message(record: &DeadlineRecord) -> String {
    format!(
        "Deadline reached: {} ({})",
        record.formatted(),
        record.source_zone().name()
    )
}

/// Prints the alert line, optionally with the terminal bell.
pub struct TerminalAlert<W: Write = io::Stdout> {
    out: W,
    bell: bool,
    colors: bool,
}

impl TerminalAlert<io::Stdout> {
    pub fn stdout(bell: bool, colors: bool) -> Self {
        Self::new(io::stdout(), bell, colors)
    }
}

impl<W: Write> TerminalAlert<W> {
    pub fn new(out: W, bell: bool, colors: bool) -> Self {
        Self { out, bell, colors }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AlertSink for TerminalAlert<W> {
    fn alert(&mut self, record: &DeadlineRecord) -> Result<()> {
        let message = alert_message(record);
        if self.colors {
            writeln!(self.out, "{} {}", "⏰".bold(), message.bold().red())?;
        } else {
            writeln!(self.out, "{}", message)?;
        }
        if self.bell {
            write!(self.out, "\x07")?;
        }
        self.out.flush().context("Failed to flush alert output")?;
        Ok(())
    }
}

/// Runs an external notifier (e.g. `notify-send Deadlines`) with the alert
/// text appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandAlert {
    program: String,
    args: Vec<String>,
}

impl CommandAlert {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl AlertSink for CommandAlert {
    fn alert(&mut self, record: &DeadlineRecord) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(alert_message(record))
            .status()
            .with_context(|| format!("Failed to run alert command `{}`", self.program))?;
        if !status.success() {
            bail!("Alert command `{}` exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Delivers to every sink; one failing sink does not starve the others.
#[derive(Default)]
pub struct FanoutAlert {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutAlert {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(cfg: &AlertConfig) -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> =
            vec![Box::new(TerminalAlert::stdout(cfg.bell, cfg.colors))];
        if let Some(command) = cfg.command.as_deref().and_then(CommandAlert::from_argv) {
            sinks.push(Box::new(command));
        }
        Self::new(sinks)
    }
}

impl AlertSink for FanoutAlert {
    fn alert(&mut self, record: &DeadlineRecord) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.alert(record) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Shared stop flag for [`AlertLoop::run`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on cancellation. Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return true;
            }
            let slice = remaining.min(CANCEL_POLL_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        self.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub now: String,
    pub reloaded: bool,
    pub fired: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ticks: u64,
    pub fired: u64,
    pub failed_ticks: u64,
}

pub struct AlertLoop<C: Clock, S: AlertSink> {
    store: DeadlineStore,
    collection: DeadlineCollection,
    token: StoreToken,
    clock: C,
    sink: S,
    interval: Duration,
    /// Fired deadlines were dropped in memory but the rewrite failed.
    pending_save: bool,
}

impl<C: Clock, S: AlertSink> AlertLoop<C, S> {
    /// Load (or bootstrap) the store and prepare to poll it.
    pub fn new(
        store: DeadlineStore,
        local_zone: Tz,
        clock: C,
        sink: S,
        interval: Duration,
    ) -> Result<Self> {
        let (doc, token) = store.load()?;
        let collection = DeadlineCollection::from_document(&doc, local_zone)?;
        Ok(Self {
            store,
            collection,
            token,
            clock,
            sink,
            interval,
            pending_save: false,
        })
    }

    pub fn collection(&self) -> &DeadlineCollection {
        &self.collection
    }

    /// One poll: refresh from disk if the file changed, then fire and drop
    /// every deadline due this minute, in display order.
    pub fn tick(&mut self) -> Result<TickReport> {
        let now = format_instant(&self.clock.now().with_timezone(&self.collection.local_zone()));
        // Must land before any reload, or the fired deadlines come back.
        if self.pending_save {
            self.persist()?;
            info!(
                "alert.persist retried path={} entries={}",
                self.store.path().display(),
                self.collection.len()
            );
        }
        let reloaded = self.reload_if_stale()?;

        // Positions come from one snapshot; removal happens after all alerts.
        let due = self.collection.due_positions(&now);
        if due.is_empty() {
            return Ok(TickReport {
                now,
                reloaded,
                fired: 0,
            });
        }

        for &pos in &due {
            let record = &self.collection.records()[pos];
            info!("alert.fire deadline=\"{}\" now=\"{}\"", record.formatted(), now);
            if let Err(err) = self.sink.alert(record) {
                warn!("alert.deliver failed deadline=\"{}\": {:#}", record.formatted(), err);
            }
        }

        let fired = self.collection.remove_positions(&due).len();
        self.pending_save = true;
        self.persist()?;

        Ok(TickReport {
            now,
            reloaded,
            fired,
        })
    }

    fn persist(&mut self) -> Result<()> {
        self.token = self
            .store
            .save(&self.collection.to_document())
            .context("Failed to persist fired deadlines")?;
        self.pending_save = false;
        Ok(())
    }

    fn reload_if_stale(&mut self) -> Result<bool> {
        if !self.store.has_changed_since(&self.token)? {
            return Ok(false);
        }
        let (doc, token) = self.store.read()?;
        self.collection = DeadlineCollection::from_document(&doc, self.collection.local_zone())?;
        self.token = token;
        info!(
            "alert.reload path={} entries={}",
            self.store.path().display(),
            self.collection.len()
        );
        Ok(true)
    }

    /// Tick until `cancel` fires. Tick errors are logged and retried on the
    /// next tick; nothing here ends the loop except cancellation.
    pub fn run(&mut self, cancel: &CancellationToken) -> WatchSummary {
        let mut summary = WatchSummary::default();
        info!(
            "alert.watch start path={} entries={} interval_ms={}",
            self.store.path().display(),
            self.collection.len(),
            self.interval.as_millis()
        );

        while !cancel.is_cancelled() {
            summary.ticks += 1;
            match self.tick() {
                Ok(report) => {
                    summary.fired += report.fired as u64;
                    debug!(
                        "alert.tick now=\"{}\" reloaded={} fired={}",
                        report.now, report.reloaded, report.fired
                    );
                }
                Err(err) => {
                    summary.failed_ticks += 1;
                    match find_deadline_error(&err) {
                        Some(typed) if typed.is_transient() => {
                            warn!("alert.tick retry: {}", typed)
                        }
                        _ => warn!("alert.tick error: {:#}", err),
                    }
                }
            }
            if cancel.sleep(self.interval) {
                break;
            }
        }

        info!(
            "alert.watch stop ticks={} fired={} failed_ticks={}",
            summary.ticks, summary.fired, summary.failed_ticks
        );
        summary
    }
}
