// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive session: every line is a module request against the
//! intercepted module system.

use modgate_core::{
    install, restore, ModgateError, ModuleSystem, SharedPolicy, Value, BUILTIN_MODULES,
};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use std::path::PathBuf;

/// REPL configuration constants
const HISTORY_FILE: &str = ".modgate_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Policy,
    Cache,
    Restore,
    Install,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<Self> {
        let cmd = input.trim().strip_prefix('.')?.to_lowercase();

        match cmd.as_str() {
            "help" | "h" | "?" => Some(ReplCommand::Help),
            "exit" | "quit" | "q" => Some(ReplCommand::Exit),
            "policy" | "p" => Some(ReplCommand::Policy),
            "cache" | "c" => Some(ReplCommand::Cache),
            "restore" => Some(ReplCommand::Restore),
            "install" => Some(ReplCommand::Install),
            _ => None,
        }
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".policy", "Show the active policy"),
            (".cache", "List cached module locations"),
            (".restore", "Remove interception, load modules unfiltered"),
            (".install", "Install the policy again after .restore"),
        ]
    }
}

/// Completes commands and native module names
struct ModgateHelper {
    words: Vec<String>,
}

impl ModgateHelper {
    fn new() -> Self {
        let words = ReplCommand::all_commands()
            .iter()
            .map(|(cmd, _)| cmd.to_string())
            .chain(BUILTIN_MODULES.iter().map(|name| name.to_string()))
            .collect();
        Self { words }
    }
}

impl Completer for ModgateHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = &line[..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let matches: Vec<Pair> = self
            .words
            .iter()
            .filter(|w| w.starts_with(word))
            .map(|w| Pair {
                display: w.clone(),
                replacement: w[word.len()..].to_string(),
            })
            .collect();

        Ok((pos, matches))
    }
}

impl Hinter for ModgateHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() || line.len() < 2 {
            return None;
        }

        self.words
            .iter()
            .find(|w| w.starts_with(line) && w.len() > line.len())
            .map(|w| (&w[line.len()..]).dimmed().to_string())
    }
}

impl Highlighter for ModgateHelper {}

impl Validator for ModgateHelper {}

impl Helper for ModgateHelper {}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

/// The interactive module-request session
pub struct Repl {
    system: ModuleSystem,
    policy: SharedPolicy,
    editor: Editor<ModgateHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL over an installed system
    pub fn new(system: ModuleSystem, policy: SharedPolicy) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(ModgateHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modgate")
            .join(HISTORY_FILE);

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&history_path);

        Ok(Self {
            system,
            policy,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        println!(
            "{} {}",
            "modgate".cyan().bold(),
            modgate_core::VERSION.yellow()
        );
        println!(
            "Type a module identifier to load it, {} for help, {} to exit",
            ".help".green(),
            ".exit".green()
        );
        println!();

        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    if trimmed.starts_with('.') {
                        match ReplCommand::parse(trimmed) {
                            Some(cmd) => match self.execute_command(cmd) {
                                CommandResult::Continue => continue,
                                CommandResult::Exit => break,
                            },
                            None if !is_relative_request(trimmed) => {
                                eprintln!(
                                    "{}: unknown command '{}'",
                                    "Error".red().bold(),
                                    trimmed.cyan()
                                );
                                continue;
                            }
                            None => {}
                        }
                    }

                    self.load_and_print(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        Ok(())
    }

    fn format_prompt(&self) -> String {
        if self.system.is_installed() {
            format!("{} ", "modgate>".bright_green().bold())
        } else {
            format!("{} ", "modgate(raw)>".yellow().bold())
        }
    }

    fn execute_command(&mut self, cmd: ReplCommand) -> CommandResult {
        match cmd {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Policy => self.print_policy(),
            ReplCommand::Cache => {
                let keys = self.system.cache().keys();
                if keys.is_empty() {
                    println!("{}", "(cache is empty)".dimmed());
                }
                for key in keys {
                    println!("  {}", key.display());
                }
            }
            ReplCommand::Restore => {
                if restore(&self.system) {
                    println!("{}", "Interception removed".yellow());
                } else {
                    println!("{}", "Interception is not installed".dimmed());
                }
            }
            ReplCommand::Install => match install(&self.system, &self.policy) {
                Ok(true) => println!("{}", "Interception installed".green()),
                Ok(false) => println!("{}", "Interception is already installed".dimmed()),
                Err(e) => print_error(&e),
            },
        }
        CommandResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        println!();
        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:16} {}", cmd.cyan(), desc.dimmed());
        }
        println!();
        println!(
            "  Any other line is loaded with {}",
            "require(<line>)".cyan()
        );
        println!();
    }

    fn print_policy(&self) {
        let policy = self.policy.read();
        match policy.to_config().to_toml_string() {
            Ok(text) => print!("{}", text),
            Err(e) => print_error(&e),
        }
        let extensions: Vec<&str> = policy.extensions().collect();
        println!("extensions = {:?}", extensions);
        println!("overrides = {:?}", policy.overridden());
    }

    fn load_and_print(&self, identifier: &str) {
        match self.system.require(identifier) {
            Ok(value) => println!("{}", format_value(&value)),
            Err(e) => print_error(&e),
        }
    }
}

/// Relative module requests start with a dot too
fn is_relative_request(line: &str) -> bool {
    matches!(line, "." | "..") || line.starts_with("./") || line.starts_with("../")
}

/// Format a module value for display with coloring
fn format_value(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".blue().dimmed().to_string(),
        Value::Null => "null".blue().to_string(),
        Value::Boolean(b) => b.to_string().yellow().to_string(),
        Value::Number(n) => n.to_string().yellow().to_string(),
        Value::String(s) => format!("'{}'", s).green().to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string_pretty(&value.to_json())
            .unwrap_or_else(|_| value.to_string())
            .cyan()
            .to_string(),
        Value::Function(_) => value.to_string().magenta().to_string(),
        Value::Opaque(_) => "[Opaque]".magenta().to_string(),
    }
}

/// Print a formatted error message
fn print_error(error: &ModgateError) {
    match error {
        ModgateError::AccessDenied { identifier, rule } => eprintln!(
            "{}: {} ({})",
            "AccessDenied".red().bold(),
            identifier.cyan(),
            rule.yellow()
        ),
        other => eprintln!("{}: {}", "Error".red().bold(), other),
    }
}
