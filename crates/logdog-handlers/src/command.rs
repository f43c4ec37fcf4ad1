use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use logdog_types::Handler;

/// Runs a program for every batch, feeding the lines on stdin
///
/// The program sees the batch's file in `LOGDOG_PATH`, the number of lines
/// in `LOGDOG_LINES` and, when set, the dog name in `LOGDOG_DOG`. A non-zero
/// exit status is reported as a handler error.
#[derive(Clone, Debug)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    dog: Option<String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dog: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dog(mut self, name: impl Into<String>) -> Self {
        self.dog = Some(name.into());
        self
    }
}

impl Handler for CommandHandler {
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("LOGDOG_PATH", path)
            .env("LOGDOG_LINES", lines.len().to_string())
            .stdin(Stdio::piped());
        if let Some(dog) = &self.dog {
            command.env("LOGDOG_DOG", dog);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            for line in lines {
                // A program that exits without reading is judged by its status
                if stdin.write_all(line.as_bytes()).is_err() {
                    break;
                }
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }

        tracing::debug!(program = %self.program, path = %path.display(), lines = lines.len(), "command done");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("command:{}", self.program)
    }
}
