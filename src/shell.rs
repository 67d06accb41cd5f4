use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{event, Level};

use crate::analyzer::Analyzer;
use crate::defs::Kind;
use crate::render::{unescape, CallOutput, OutputTemplate};
use crate::write::write_report;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug)]
pub enum ShellCommand {
    /// shows top [n] time or memory calls
    Top {
        #[arg(default_value_t = 10)]
        n: usize,
        #[arg(value_enum, short, long, default_value_t = Kind::Time)]
        kind: Kind,
    },
    /// shows the first call made by the main function
    First,
    /// shows the top [n] calls whose caller name starts with a regex prefix
    Prefix {
        prefix: String,
        #[arg(default_value_t = 5)]
        n: usize,
    },
    /// modify output format
    Output {
        #[command(subcommand)]
        action: OutputAction,
    },
    /// writes every call edge as json
    Export { path: PathBuf },
    #[command(alias = "quit")]
    Exit,
}

#[derive(Subcommand, Debug)]
pub enum OutputAction {
    Show,
    /// sets the template; \n and \t are understood
    Set {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        template: Vec<String>,
    },
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    analyzer: Box<dyn Analyzer>,
    template: OutputTemplate,
}

impl Shell {
    pub fn new(analyzer: Box<dyn Analyzer>, template: Option<&str>) -> Result<Self, tera::Error> {
        let template = match template {
            Some(source) => OutputTemplate::new(&unescape(source))?,
            None => OutputTemplate::builtin()?,
        };
        Ok(Self { analyzer, template })
    }

    fn print_calls(&self, out: &mut dyn Write, n: usize, kind: Kind) -> Result<(), anyhow::Error> {
        for (row, edge) in self.analyzer.top(n, kind).into_iter().enumerate() {
            let call = CallOutput::new(row + 1, edge, kind, self.analyzer.percentage(edge, kind));
            self.template.render_to(&call, &mut *out)?;
        }
        Ok(())
    }

    /// Runs one command line.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow, anyhow::Error> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Flow::Continue);
        }
        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                write!(out, "{}", e.render())?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            ShellCommand::Top { n, kind } => {
                self.print_calls(out, n, kind)?;
                writeln!(out)?;
            }
            ShellCommand::First => match self.analyzer.first() {
                Some(edge) => {
                    let call = CallOutput::new(1, edge, Kind::Time, self.analyzer.percentage(edge, Kind::Time));
                    self.template.render_to(&call, &mut *out)?;
                }
                None => writeln!(out, "the main function makes no calls")?,
            },
            ShellCommand::Prefix { prefix, n } => {
                let rows = self.analyzer.top_by_caller_prefix(n, &prefix)?;
                for (i, row) in rows.iter().enumerate() {
                    writeln!(
                        out,
                        "({}) {:.3} sec {:.3} kB: {} -> {} (line: {})",
                        i + 1,
                        row.time_sec,
                        row.memory_kb,
                        row.caller,
                        row.callee,
                        row.line
                    )?;
                }
                writeln!(out)?;
            }
            ShellCommand::Output { action } => match action {
                OutputAction::Show => writeln!(out, "Current format: {:?}", self.template.source())?,
                OutputAction::Set { template } => {
                    self.template = OutputTemplate::new(&unescape(&template.join(" ")))?;
                    writeln!(out, "Successfully set to {:?}", self.template.source())?;
                }
                OutputAction::Reset => {
                    self.template = OutputTemplate::builtin()?;
                    writeln!(out, "Successfully reset template to {:?}", self.template.source())?;
                }
            },
            ShellCommand::Export { path } => {
                write_report(self.analyzer.index(), &path)?;
                writeln!(out, "wrote {} edges to {}", self.analyzer.index().len(), path.display())?;
            }
            ShellCommand::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    /// Prompt loop until `exit` or end of input. Failed commands are reported and skipped.
    pub fn run(&mut self, input: impl BufRead, mut out: impl Write) -> Result<(), anyhow::Error> {
        let root = self.analyzer.index().root();
        writeln!(
            out,
            "apollon v{} ... {} call edges below {} ({:?} backend)",
            env!("CARGO_PKG_VERSION"),
            self.analyzer.index().len(),
            root,
            self.analyzer.backend()
        )?;
        let mut lines = input.lines();
        loop {
            write!(out, ">>> ")?;
            out.flush()?;
            let Some(line) = lines.next() else {
                writeln!(out)?;
                break;
            };
            match self.execute(&line?, &mut out) {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => {
                    event!(Level::WARN, "command failed: {:#}", e);
                    writeln!(out, "error: {e:#}")?;
                }
            }
        }
        Ok(())
    }
}
