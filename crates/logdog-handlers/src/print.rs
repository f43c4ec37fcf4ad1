use std::io::{self, Write};
use std::path::Path;

use logdog_types::Handler;

/// Writes every line to stdout exactly as read
#[derive(Clone, Debug, Default)]
pub struct PrintHandler {
    /// Prefix each line with the file it came from
    show_path: bool,
}

impl PrintHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, show_path: bool) -> Self {
        self.show_path = show_path;
        self
    }

    fn write_to(&self, out: &mut impl Write, path: &Path, lines: &[String]) -> io::Result<()> {
        for line in lines {
            if self.show_path {
                write!(out, "{}: ", path.display())?;
            }
            out.write_all(line.as_bytes())?;
        }
        out.flush()
    }
}

impl Handler for PrintHandler {
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write_to(&mut out, path, lines)?;
        Ok(())
    }

    fn describe(&self) -> String {
        "print".to_string()
    }
}
