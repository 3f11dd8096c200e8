//! Interactive text menu over one deadline store.
//!
//! Each [`MenuCommand`] maps to a handler that receives the whole
//! [`Session`] explicitly. Handler errors are reported and the menu keeps
//! going; only `Close` or end of input leaves it.

use crate::alert::{AlertLoop, CancellationToken, FanoutAlert, SystemClock};
use crate::collection::DeadlineCollection;
use crate::config::AlertConfig;
use crate::deadline::{parse_zone, DeadlineRecord};
use crate::error::find_deadline_error;
use crate::store::{DeadlineStore, StoreToken};
use anyhow::Result;
use chrono_tz::Tz;
use log::debug;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    List,
    Add,
    Remove,
    Watch,
    Close,
}

pub type Handler<R, W> = fn(&mut Session<R, W>) -> Result<Flow>;

impl MenuCommand {
    pub const ALL: [MenuCommand; 5] = [
        MenuCommand::List,
        MenuCommand::Add,
        MenuCommand::Remove,
        MenuCommand::Watch,
        MenuCommand::Close,
    ];

    pub fn key(self) -> &'static str {
        match self {
            MenuCommand::List => "1",
            MenuCommand::Add => "2",
            MenuCommand::Remove => "3",
            MenuCommand::Watch => "4",
            MenuCommand::Close => "5",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MenuCommand::List => "List deadlines",
            MenuCommand::Add => "Add a deadline",
            MenuCommand::Remove => "Remove a deadline",
            MenuCommand::Watch => "Start deadline alerts (until Ctrl+C)",
            MenuCommand::Close => "Close",
        }
    }

    pub fn from_input(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ALL.into_iter().find(|cmd| cmd.key() == input)
    }

    pub fn handler<R: BufRead, W: Write>(self) -> Handler<R, W> {
        match self {
            MenuCommand::List => list_deadlines,
            MenuCommand::Add => add_deadline,
            MenuCommand::Remove => remove_deadline,
            MenuCommand::Watch => watch_deadlines,
            MenuCommand::Close => close_menu,
        }
    }
}

pub struct Session<R, W> {
    store: DeadlineStore,
    collection: DeadlineCollection,
    token: StoreToken,
    alert: AlertConfig,
    cancel: CancellationToken,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(
        store: DeadlineStore,
        local_zone: Tz,
        alert: AlertConfig,
        cancel: CancellationToken,
        input: R,
        output: W,
    ) -> Result<Self> {
        let (doc, token) = store.load()?;
        let collection = DeadlineCollection::from_document(&doc, local_zone)?;
        Ok(Self {
            store,
            collection,
            token,
            alert,
            cancel,
            input,
            output,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            self.print_menu()?;
            let Some(choice) = self.prompt("Select an option: ")? else {
                return Ok(());
            };
            let Some(cmd) = MenuCommand::from_input(&choice) else {
                writeln!(self.output, "Unknown option `{}`", choice)?;
                continue;
            };
            if self.dispatch(cmd)? == Flow::Exit {
                writeln!(self.output, "Goodbye.")?;
                return Ok(());
            }
        }
    }

    /// Run one command; its failure is reported, not propagated.
    pub fn dispatch(&mut self, cmd: MenuCommand) -> Result<Flow> {
        debug!("menu.dispatch command={:?}", cmd);
        // An unreadable store aborts the command so nothing overwrites it.
        if cmd != MenuCommand::Close {
            if let Err(err) = self.refresh() {
                self.report(&err)?;
                return Ok(Flow::Continue);
            }
        }
        let handler: Handler<R, W> = cmd.handler();
        match handler(self) {
            Ok(flow) => Ok(flow),
            Err(err) => {
                self.report(&err)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn print_menu(&mut self) -> Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "Deadline Notifier")?;
        for cmd in MenuCommand::ALL {
            writeln!(self.output, "  {}) {}", cmd.key(), cmd.label())?;
        }
        Ok(())
    }

    fn print_list(&mut self) -> Result<()> {
        if self.collection.is_empty() {
            writeln!(self.output, "No deadlines.")?;
            return Ok(());
        }
        for (index, formatted) in self.collection.list_entries() {
            writeln!(self.output, "{}: {}", index, formatted)?;
        }
        Ok(())
    }

    /// `None` on end of input.
    fn prompt(&mut self, message: &str) -> Result<Option<String>> {
        write!(self.output, "{}", message)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Ask until the answer is Y or N. End of input counts as N.
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            let Some(answer) = self.prompt(&format!("{} (Y/N): ", question))? else {
                return Ok(false);
            };
            match answer.to_ascii_uppercase().as_str() {
                "Y" => return Ok(true),
                "N" => return Ok(false),
                _ => writeln!(self.output, "Please answer Y or N.")?,
            }
        }
    }

    fn report(&mut self, err: &anyhow::Error) -> Result<()> {
        match find_deadline_error(err) {
            Some(typed) => writeln!(self.output, "Error: {}", typed.user_message())?,
            None => writeln!(self.output, "Error: {:#}", err)?,
        }
        Ok(())
    }

    /// Pick up edits made to the file by another process since our last read.
    fn refresh(&mut self) -> Result<()> {
        let changed = self.store.has_changed_since(&self.token).unwrap_or(true);
        if changed {
            self.reload()?;
        }
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let (doc, token) = self.store.load()?;
        self.collection = DeadlineCollection::from_document(&doc, self.collection.local_zone())?;
        self.token = token;
        Ok(())
    }

    // Mutations go to a copy first so a failed save leaves memory untouched.
    fn commit(&mut self, next: DeadlineCollection) -> Result<()> {
        self.token = self.store.save(&next.to_document())?;
        self.collection = next;
        Ok(())
    }
}

fn list_deadlines<R: BufRead, W: Write>(session: &mut Session<R, W>) -> Result<Flow> {
    session.print_list()?;
    Ok(Flow::Continue)
}

fn add_deadline<R: BufRead, W: Write>(session: &mut Session<R, W>) -> Result<Flow> {
    let local_zone = session.collection.local_zone();
    let Some(text) = session.prompt("Deadline (MM/DD/YYYY - HH:MM): ")? else {
        return Ok(Flow::Exit);
    };
    let Some(zone_text) = session.prompt(&format!("Time zone [{}]: ", local_zone.name()))? else {
        return Ok(Flow::Exit);
    };
    let zone = if zone_text.is_empty() {
        local_zone
    } else {
        parse_zone(&zone_text)?
    };
    let record = DeadlineRecord::from_wall_clock(&text, zone, local_zone)?;

    if !session.confirm(&format!("Add deadline {} ({})?", text, zone.name()))? {
        writeln!(session.output, "Cancelled.")?;
        return Ok(Flow::Continue);
    }

    let mut next = session.collection.clone();
    next.add(record);
    session.commit(next)?;
    writeln!(session.output, "Deadline added.")?;
    Ok(Flow::Continue)
}

fn remove_deadline<R: BufRead, W: Write>(session: &mut Session<R, W>) -> Result<Flow> {
    session.print_list()?;
    if session.collection.is_empty() {
        return Ok(Flow::Continue);
    }
    let Some(id) = session.prompt("Deadline ID to remove: ")? else {
        return Ok(Flow::Exit);
    };

    let mut next = session.collection.clone();
    let removed = next.remove_index_text(&id)?;
    if !session.confirm(&format!("Remove deadline {}?", removed.formatted()))? {
        writeln!(session.output, "Cancelled.")?;
        return Ok(Flow::Continue);
    }

    session.commit(next)?;
    writeln!(session.output, "Deadline removed.")?;
    Ok(Flow::Continue)
}

fn close_menu<R: BufRead, W: Write>(_session: &mut Session<R, W>) -> Result<Flow> {
    Ok(Flow::Exit)
}

fn watch_deadlines<R: BufRead, W: Write>(session: &mut Session<R, W>) -> Result<Flow> {
    writeln!(
        session.output,
        "Watching for deadlines. Ctrl+C stops watching and quits."
    )?;
    session.output.flush()?;

    let mut alerts = AlertLoop::new(
        session.store.clone(),
        session.collection.local_zone(),
        SystemClock,
        FanoutAlert::from_config(&session.alert),
        session.alert.poll_interval(),
    )?;
    let summary = alerts.run(&session.cancel);

    writeln!(
        session.output,
        "Stopped watching ({} alert(s) fired).",
        summary.fired
    )?;
    session.reload()?;
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_write::WriteOptions;
    use crate::store::DEFAULT_FILE_NAME;
    use std::fs;
    use tempfile::TempDir;

    fn session<'a>(tmp: &TempDir, input: &'a str) -> Session<&'a [u8], Vec<u8>> {
        session_with_cancel(tmp, input, CancellationToken::new())
    }

    fn session_with_cancel<'a>(
        tmp: &TempDir,
        input: &'a str,
        cancel: CancellationToken,
    ) -> Session<&'a [u8], Vec<u8>> {
        let store = DeadlineStore::new(tmp.path().join(DEFAULT_FILE_NAME), WriteOptions::fast());
        Session::new(
            store,
            Tz::UTC,
            AlertConfig::default(),
            cancel,
            input.as_bytes(),
            Vec::new(),
        )
        .unwrap()
    }

    fn output<R>(session: &Session<R, Vec<u8>>) -> String {
        String::from_utf8_lossy(&session.output).into_owned()
    }

    fn stored_dates(tmp: &TempDir) -> Vec<String> {
        let store = DeadlineStore::new(tmp.path().join(DEFAULT_FILE_NAME), WriteOptions::fast());
        let (doc, _) = store.read().unwrap();
        doc.deadlines.into_iter().map(|d| d.date_time).collect()
    }

    #[test]
    fn command_table_covers_every_key() {
        for cmd in MenuCommand::ALL {
            assert_eq!(MenuCommand::from_input(cmd.key()), Some(cmd));
        }
        assert_eq!(MenuCommand::from_input(" 2 "), Some(MenuCommand::Add));
        assert_eq!(MenuCommand::from_input("9"), None);
    }

    #[test]
    fn list_shows_bootstrap_entry() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "1\n5\n");
        s.run().unwrap();
        let out = output(&s);
        assert!(out.contains("1: 01/01/2024 - 00:00"), "{out}");
        assert!(out.ends_with("Goodbye.\n"));
    }

    #[test]
    fn add_with_confirmation_persists() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "2\n12/25/2024 - 09:00\n\nmaybe\ny\n5\n");
        s.run().unwrap();

        assert!(output(&s).contains("Please answer Y or N."));
        assert!(output(&s).contains("Deadline added."));
        assert_eq!(
            stored_dates(&tmp),
            vec!["01/01/2024 - 00:00", "12/25/2024 - 09:00"]
        );
    }

    #[test]
    fn declined_add_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "2\n12/25/2024 - 09:00\nUTC\nN\n5\n");
        s.run().unwrap();

        assert!(output(&s).contains("Cancelled."));
        assert_eq!(stored_dates(&tmp), vec!["01/01/2024 - 00:00"]);
    }

    #[test]
    fn invalid_date_is_reported_and_menu_continues() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "2\nnext tuesday\n\n1\n5\n");
        s.run().unwrap();

        let out = output(&s);
        assert!(out.contains("Error: invalid deadline `next tuesday`"), "{out}");
        assert!(out.contains("1: 01/01/2024 - 00:00"));
        assert_eq!(stored_dates(&tmp), vec!["01/01/2024 - 00:00"]);
    }

    #[test]
    fn foreign_zone_add_keeps_authoring_zone() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "2\n12/25/2024 - 09:00\nAmerica/New_York\nY\n1\n5\n");
        s.run().unwrap();

        assert!(output(&s).contains("2: 12/25/2024 - 14:00"));
        let raw = fs::read_to_string(tmp.path().join(DEFAULT_FILE_NAME)).unwrap();
        assert!(raw.contains("America/New_York"));
        assert!(raw.contains("12/25/2024 - 09:00"));
    }

    #[test]
    fn remove_rejects_bad_id_without_mutation() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "3\nabc\n3\n7\n5\n");
        s.run().unwrap();

        let out = output(&s);
        assert_eq!(out.matches("Error: Invalid deadline ID").count(), 2, "{out}");
        assert_eq!(stored_dates(&tmp), vec!["01/01/2024 - 00:00"]);
    }

    #[test]
    fn remove_confirmed_deletes_entry() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "3\n1\nY\n1\n5\n");
        s.run().unwrap();

        let out = output(&s);
        assert!(out.contains("Deadline removed."));
        assert!(out.contains("No deadlines."));
        assert!(stored_dates(&tmp).is_empty());
    }

    #[test]
    fn picks_up_external_edits_before_acting() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "");
        fs::write(
            tmp.path().join(DEFAULT_FILE_NAME),
            r#"{"deadlines":[{"Date_Time":"03/01/2031 - 08:15","TZ":"UTC"},{"Date_Time":"04/01/2031 - 08:15","TZ":"UTC"}]}"#,
        )
        .unwrap();

        s.dispatch(MenuCommand::List).unwrap();
        let out = output(&s);
        assert!(out.contains("1: 03/01/2031 - 08:15"));
        assert!(out.contains("2: 04/01/2031 - 08:15"));
    }

    #[test]
    fn malformed_store_aborts_add_and_is_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "2\n12/25/2024 - 09:00\n\nY\n5\n");
        let path = tmp.path().join(DEFAULT_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        s.run().unwrap();
        let out = output(&s);
        assert!(out.contains("could not be parsed"), "{out}");
        assert!(!out.contains("Deadline added."));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn watch_returns_to_menu_when_cancelled() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut s = session_with_cancel(&tmp, "4\n5\n", cancel);
        s.run().unwrap();

        let out = output(&s);
        assert!(out.contains("4) Start deadline alerts (until Ctrl+C)"));
        assert!(out.contains("Ctrl+C stops watching and quits."));
        assert!(out.contains("Stopped watching (0 alert(s) fired)."));
        assert!(out.ends_with("Goodbye.\n"));
    }

    #[test]
    fn end_of_input_closes_menu() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, "");
        s.run().unwrap();
        assert!(!output(&s).contains("Goodbye."));
    }
}
