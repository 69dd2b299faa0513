use anyhow::{bail, Result};
use std::io::{self, BufRead, StdinLock, Stdout, Write};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("input closed")]
pub struct InputClosed;

/// Numbered-menu prompts over any line source.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }

    /// Writes `text` without ending the line, for a result that follows.
    pub fn begin(&mut self, text: &str) -> Result<()> {
        write!(self.output, "{text} ")?;
        self.output.flush()?;
        Ok(())
    }

    /// Reads one line after a `> ` prompt, without the line ending.
    pub fn line(&mut self) -> Result<String> {
        write!(self.output, "> ")?;
        self.output.flush()?;
        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Err(InputClosed.into());
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Lists `options` as `1) ...` and returns the zero-based index picked.
    /// Anything that is not a listed number prints `invalid_text` and asks again.
    pub fn choose<S: AsRef<str>>(
        &mut self,
        title: &str,
        options: &[S],
        invalid_text: &str,
    ) -> Result<usize> {
        if options.is_empty() {
            bail!("nothing to choose from for `{title}`");
        }
        writeln!(self.output, "{title}")?;
        for (index, option) in options.iter().enumerate() {
            writeln!(self.output, "{}) {}", index + 1, option.as_ref())?;
        }
        loop {
            let raw = self.line()?;
            match raw.trim().parse::<usize>() {
                Ok(choice) if (1..=options.len()).contains(&choice) => return Ok(choice - 1),
                _ => writeln!(self.output, "{invalid_text}")?,
            }
        }
    }
}
