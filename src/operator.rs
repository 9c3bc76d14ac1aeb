//! Human-in-the-loop capability.
//!
//! All operator interaction (prompts, confirmations, notifications) goes through
//! [`HumanInTheLoop`], so the allocator and state machine can be driven without
//! a terminal. [`ConsoleOperator`] talks to stdin/stdout; [`ScriptedOperator`]
//! replays queued answers and records notifications for tests and unattended runs.

use crate::error::{DeckError, DeckResult};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};

/// Severity of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// A message for the operator: run start/stop, retries, failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Mirrors the notification into the log.
    fn log(&self) {
        match self.level {
            Level::Info => info!(title = %self.title, "{}", self.body),
            Level::Warning => warn!(title = %self.title, "{}", self.body),
            Level::Error => error!(title = %self.title, "{}", self.body),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.level, self.title, self.body)
    }
}

/// Operator interaction injected into the scheduler and CLI.
pub trait HumanInTheLoop: Send + Sync {
    /// Asks a free-text question and returns the trimmed answer.
    fn ask(&self, question: &str) -> DeckResult<String>;

    /// Delivers a notification.
    fn notify(&self, notification: &Notification);

    /// Yes/no question. Anything but `y`/`yes` is a no.
    fn confirm(&self, question: &str) -> DeckResult<bool> {
        let answer = self.ask(&format!("{question} [y/N]"))?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    /// Like [`confirm`](Self::confirm), but a "no" aborts the run.
    fn require_confirmation(&self, question: &str) -> DeckResult<()> {
        if self.confirm(question)? {
            return Ok(());
        }
        self.notify(&Notification::warning("Run aborted", question.to_string()));
        Err(DeckError::Aborted(format!("operator declined: {question}")))
    }

    /// Picks one of `options` by number (1-based) or by exact text.
    fn choose(&self, question: &str, options: &[String]) -> DeckResult<usize> {
        let menu: Vec<String> = options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("  {}) {o}", i + 1))
            .collect();
        let answer = self.ask(&format!("{question}\n{}", menu.join("\n")))?;
        if let Ok(n) = answer.parse::<usize>() {
            if (1..=options.len()).contains(&n) {
                return Ok(n - 1);
            }
        }
        options
            .iter()
            .position(|o| *o == answer)
            .ok_or_else(|| DeckError::Aborted(format!("'{answer}' is not one of the offered choices")))
    }
}

/// Interactive operator on the controlling terminal.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl HumanInTheLoop for ConsoleOperator {
    fn ask(&self, question: &str) -> DeckResult<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}\n> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(DeckError::Aborted("stdin closed".to_string()));
        }
        Ok(line.trim().to_string())
    }

    fn notify(&self, notification: &Notification) {
        notification.log();
        println!("{notification}");
    }
}

/// Replays pre-recorded answers; records every notification.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    notifications: Mutex<Vec<Notification>>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// Notifications delivered so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Titles of the notifications delivered so far.
    pub fn titles(&self) -> Vec<String> {
        self.notifications().into_iter().map(|n| n.title).collect()
    }
}

impl HumanInTheLoop for ScriptedOperator {
    fn ask(&self, question: &str) -> DeckResult<String> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| DeckError::Aborted(format!("no scripted answer for '{question}'")))
    }

    fn notify(&self, notification: &Notification) {
        notification.log();
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let op = ScriptedOperator::new(["yes", "2", "plate"]);
        assert!(op.confirm("continue?").unwrap());
        let options = vec!["tips".to_string(), "plate".to_string()];
        assert_eq!(op.choose("which?", &options).unwrap(), 1);
        assert_eq!(op.choose("which?", &options).unwrap(), 1);
        assert!(matches!(op.ask("more?"), Err(DeckError::Aborted(_))));
    }

    #[test]
    fn test_choose_rejects_unknown() {
        let op = ScriptedOperator::new(["9"]);
        assert!(op.choose("which?", &["a".to_string()]).is_err());
    }

    #[test]
    fn test_require_confirmation_aborts_on_no() {
        let op = ScriptedOperator::new(["y", "n"]);
        assert!(op.require_confirmation("Tips loaded?").is_ok());
        assert!(matches!(
            op.require_confirmation("Tips loaded?"),
            Err(DeckError::Aborted(_))
        ));
        assert_eq!(op.titles(), vec!["Run aborted"]);
    }

    #[test]
    fn test_notifications_recorded() {
        let op = ScriptedOperator::default();
        op.notify(&Notification::warning("Retry", "attempt 2 of 3"));
        assert_eq!(op.titles(), vec!["Retry"]);
        assert_eq!(op.notifications()[0].level, Level::Warning);
    }
}
