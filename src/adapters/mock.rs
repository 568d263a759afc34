//! In-memory transport for tests and dry runs.
//!
//! A [`MockTransport`] splits written bytes into lines and hands each line to a
//! [`Responder`], which may queue reply text. Reads return whatever has been
//! queued and time out immediately when nothing is pending. Every written line
//! is also appended to a [`Journal`], which several transports can share so a
//! test can assert the order of commands across boards.

use super::{timed_out, Transport};
use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Produces the device's reply to one command line.
pub trait Responder: Send {
    /// Returns the text the device prints in reply to `line`, if any.
    fn respond(&mut self, line: &str) -> Option<String>;
}

impl<F> Responder for F
where
    F: FnMut(&str) -> Option<String> + Send,
{
    fn respond(&mut self, line: &str) -> Option<String> {
        self(line)
    }
}

/// One line written to a mock transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    /// Label of the transport that received the line.
    pub link: String,
    /// The command line, without its terminator.
    pub line: String,
}

/// Shared, ordered record of command lines written to mock transports.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, link: &str, line: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(JournalEntry {
                link: link.to_string(),
                line: line.to_string(),
            });
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Lines written to the transport labelled `link`, oldest first.
    pub fn lines_for(&self, link: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.link == link)
            .map(|entry| entry.line)
            .collect()
    }
}

/// Line-oriented simulated transport.
pub struct MockTransport {
    label: String,
    responder: Box<dyn Responder>,
    journal: Journal,
    partial: String,
    pending: Vec<u8>,
}

impl MockTransport {
    /// Creates a transport answering through `responder`.
    pub fn new(label: impl Into<String>, responder: impl Responder + 'static) -> Self {
        Self {
            label: label.into(),
            responder: Box::new(responder),
            journal: Journal::new(),
            partial: String::new(),
            pending: Vec::new(),
        }
    }

    /// Records written lines into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Queues text the device prints before any command, such as a banner.
    pub fn with_pending(mut self, text: &str) -> Self {
        self.pending.extend_from_slice(text.as_bytes());
        self
    }

    /// Journal this transport writes into.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.partial.push_str(&String::from_utf8_lossy(bytes));

        while let Some(end) = self.partial.find(['\r', '\n']) {
            let line: String = self.partial.drain(..=end).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            self.journal.push(&self.label, line);
            if let Some(reply) = self.responder.respond(line) {
                self.pending.extend_from_slice(reply.as_bytes());
            }
        }
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> io::Result<Bytes> {
        if self.pending.is_empty() {
            return Err(timed_out(timeout));
        }
        Ok(Bytes::from(std::mem::take(&mut self.pending)))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}
