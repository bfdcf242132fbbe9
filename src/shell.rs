//! Line-oriented command shell over an allocator
//!
//! One command per line:
//!
//! ```text
//! put <key> <text>            store text (rest of the line)
//! fill <key> <size> <byte>    store <size> copies of <byte> (decimal or 0x..)
//! get <key>                   print a value
//! del <key>                   delete a value
//! remaining                   print remaining capacity
//! stats                       print statistics as JSON
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::error::{Error, Result};
use crate::slab::Allocator;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: Vec<u8> },
    Fill { key: String, size: usize, byte: u8 },
    Get { key: String },
    Del { key: String },
    Remaining,
    Stats,
}

impl Command {
    /// Parse one script line; `None` for blank lines and comments
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        let command = match name {
            "put" => {
                let (key, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| usage("put <key> <text>"))?;
                Command::Put {
                    key: key.to_string(),
                    value: text.trim_start().as_bytes().to_vec(),
                }
            }
            "fill" => {
                let key = args.next().ok_or_else(|| usage("fill <key> <size> <byte>"))?;
                let size = args
                    .next()
                    .ok_or_else(|| usage("fill <key> <size> <byte>"))?
                    .parse::<usize>()
                    .map_err(|e| Error::InvalidCommand(format!("Bad size: {}", e)))?;
                let byte = args
                    .next()
                    .ok_or_else(|| usage("fill <key> <size> <byte>"))
                    .and_then(parse_byte)?;
                Command::Fill {
                    key: key.to_string(),
                    size,
                    byte,
                }
            }
            "get" => Command::Get {
                key: single_key(&mut args, "get <key>")?,
            },
            "del" => Command::Del {
                key: single_key(&mut args, "del <key>")?,
            },
            "remaining" => Command::Remaining,
            "stats" => Command::Stats,
            other => {
                return Err(Error::InvalidCommand(format!("Unknown command '{}'", other)));
            }
        };

        Ok(Some(command))
    }
}

fn usage(form: &str) -> Error {
    Error::InvalidCommand(format!("Usage: {}", form))
}

fn single_key<'a>(args: &mut impl Iterator<Item = &'a str>, form: &str) -> Result<String> {
    let key = args.next().ok_or_else(|| usage(form))?;
    if args.next().is_some() {
        return Err(usage(form));
    }
    Ok(key.to_string())
}

fn parse_byte(text: &str) -> Result<u8> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|e| Error::InvalidCommand(format!("Bad byte '{}': {}", text, e)))
}

/// Outcome of a script run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptSummary {
    pub executed: usize,
    pub failed: usize,
}

/// Executes commands against an owned allocator
pub struct Shell {
    allocator: Allocator,
}

impl Shell {
    pub fn new(allocator: Allocator) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Run one command and render its output
    pub fn execute(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Put { key, value } => {
                self.allocator.put(&key, value.len(), &value)?;
                Ok(format!("OK {} ({} bytes)", key, value.len()))
            }
            Command::Fill { key, size, byte } => {
                let value = vec![byte; size];
                self.allocator.put(&key, size, &value)?;
                Ok(format!("OK {} ({} bytes)", key, size))
            }
            Command::Get { key } => {
                let value = self.allocator.get_vec(&key)?;
                Ok(format!("{} = {:?}", key, String::from_utf8_lossy(&value)))
            }
            Command::Del { key } => {
                self.allocator.del(&key)?;
                Ok(format!("OK deleted {}", key))
            }
            Command::Remaining => Ok(format!(
                "remaining {} of {} bytes",
                self.allocator.remaining_capacity(),
                self.allocator.total_budget()
            )),
            Command::Stats => serde_json::to_string_pretty(&self.allocator.stats())
                .map_err(|e| Error::Io(format!("Failed to render stats: {}", e))),
        }
    }

    /// Parse and run one line; `None` when the line holds no command
    pub fn run_line(&mut self, line: &str) -> Option<Result<String>> {
        match Command::parse(line) {
            Ok(Some(command)) => Some(self.execute(command)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    /// Run every line of `input`, writing results to `output`
    ///
    /// A failing command is reported and the script carries on.
    pub fn run_script<R: BufRead, W: Write>(
        &mut self,
        input: R,
        mut output: W,
    ) -> Result<ScriptSummary> {
        let mut summary = ScriptSummary::default();

        for (number, line) in input.lines().enumerate() {
            let line = line.map_err(|e| Error::Io(format!("Failed to read script: {}", e)))?;
            let text = match self.run_line(&line) {
                None => continue,
                Some(Ok(text)) => {
                    summary.executed += 1;
                    text
                }
                Some(Err(e)) => {
                    summary.executed += 1;
                    summary.failed += 1;
                    warn!(line = number + 1, error = %e, "Command failed");
                    format!("ERR line {}: {}", number + 1, e)
                }
            };
            writeln!(output, "{}", text)
                .map_err(|e| Error::Io(format!("Failed to write output: {}", e)))?;
        }

        debug!(executed = summary.executed, failed = summary.failed, "Script finished");
        Ok(summary)
    }
}
