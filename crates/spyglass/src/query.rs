// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spyglass query` command implementation.
//!
//! Flags are combined into one [`Predicate`] and evaluated by the store.
//! Results are printed oldest first, one per line, or as JSON lines.

use clap::{Args, Subcommand};
use serde::Serialize;
use spyglass_core::types::{MessageRecord, TaskRecord};
use spyglass_core::{Level, SessionId, SpyglassError, TaskState};
use spyglass_storage::{LogStore, MessageField, Predicate, Query, TaskField};

#[derive(Subcommand, Debug)]
pub enum Target {
    /// Log messages.
    Messages(MessageArgs),
    /// Network tasks.
    Tasks(TaskArgs),
}

#[derive(Args, Debug, Default)]
pub struct MessageArgs {
    /// Minimum level.
    #[arg(long)]
    pub level: Option<Level>,
    /// Only these labels. Repeatable.
    #[arg(long)]
    pub label: Vec<String>,
    /// Text contains this string.
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub session: Option<SessionId>,
    /// Only pinned messages.
    #[arg(long)]
    pub pinned: bool,
    /// Most recent entries to show.
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
    /// Print JSON lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct TaskArgs {
    /// pending, success or failure.
    #[arg(long)]
    pub state: Option<TaskState>,
    #[arg(long)]
    pub host: Option<String>,
    /// URL contains this string.
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub method: Option<String>,
    /// Status code.
    #[arg(long)]
    pub status: Option<i32>,
    #[arg(long)]
    pub session: Option<SessionId>,
    /// Only pinned tasks.
    #[arg(long)]
    pub pinned: bool,
    /// Most recent entries to show.
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
    /// Print JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// Run the `spyglass query` command.
pub async fn run_query(store: &LogStore, target: Target) -> Result<(), SpyglassError> {
    match target {
        Target::Messages(args) => {
            let query = Query::<MessageRecord>::new()
                .filter(message_filter(&args))
                .order_by(MessageField::CreatedAt, true)
                .limit(args.limit);
            let mut messages = store.fetch(query).await?;
            messages.reverse();
            print_lines(&messages, args.json, format_message)
        }
        Target::Tasks(args) => {
            let query = Query::<TaskRecord>::new()
                .filter(task_filter(&args))
                .order_by(TaskField::CreatedAt, true)
                .limit(args.limit);
            let mut tasks = store.fetch(query).await?;
            tasks.reverse();
            print_lines(&tasks, args.json, format_task)
        }
    }
}

fn print_lines<T: Serialize>(
    records: &[T],
    json: bool,
    format: fn(&T) -> String,
) -> Result<(), SpyglassError> {
    for record in records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", format(record));
        }
    }
    Ok(())
}

pub fn message_filter(args: &MessageArgs) -> Predicate<MessageField> {
    let mut filter = Predicate::True;
    if let Some(level) = args.level {
        filter = filter.and(Predicate::ge(MessageField::Level, level));
    }
    if !args.label.is_empty() {
        filter = filter.and(Predicate::is_in(
            MessageField::Label,
            args.label.iter().map(String::as_str),
        ));
    }
    if let Some(text) = &args.text {
        filter = filter.and(Predicate::contains(MessageField::Text, text.as_str()));
    }
    if let Some(session) = args.session {
        filter = filter.and(Predicate::eq(MessageField::Session, session));
    }
    if args.pinned {
        filter = filter.and(Predicate::eq(MessageField::Pinned, true));
    }
    filter
}

pub fn task_filter(args: &TaskArgs) -> Predicate<TaskField> {
    let mut filter = Predicate::True;
    if let Some(state) = args.state {
        filter = filter.and(Predicate::eq(TaskField::State, state));
    }
    if let Some(host) = &args.host {
        filter = filter.and(Predicate::eq(TaskField::Host, host.as_str()));
    }
    if let Some(url) = &args.url {
        filter = filter.and(Predicate::contains(TaskField::Url, url.as_str()));
    }
    if let Some(method) = &args.method {
        filter = filter.and(Predicate::eq(TaskField::Method, method.to_uppercase()));
    }
    if let Some(status) = args.status {
        filter = filter.and(Predicate::eq(TaskField::StatusCode, status));
    }
    if let Some(session) = args.session {
        filter = filter.and(Predicate::eq(TaskField::Session, session));
    }
    if args.pinned {
        filter = filter.and(Predicate::eq(TaskField::Pinned, true));
    }
    filter
}

fn format_message(message: &MessageRecord) -> String {
    format!(
        "{} {:<8} [{}] {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        message.level,
        message.label,
        message.text
    )
}

fn format_task(task: &TaskRecord) -> String {
    let status = task
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let duration = task
        .duration
        .map(|d| format!("{:.0}ms", d * 1000.0))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:<7} {:<6} {:>3} {:>7} {}",
        task.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        task.state,
        task.method.as_deref().unwrap_or("GET"),
        status,
        duration,
        task.url.as_deref().unwrap_or("-")
    )
}
