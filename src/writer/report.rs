//! Human-readable and JSON renderings of engine results.

use std::io::{self, Write};

use serde::Serialize;

use crate::model::{
    Diagnostic, FixResult, FormatResult, PipelineReport, ScriptVersionRecord, ValidationResult,
};

/// Plain-text rendering of a result.
pub trait Render {
    fn render(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Write `value` as pretty JSON or through its [`Render`] impl.
pub fn emit<T>(value: &T, json: bool, out: &mut dyn Write) -> io::Result<()>
where
    T: Render + Serialize + ?Sized,
{
    if json {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)
    } else {
        value.render(out)
    }
}

fn diagnostics(out: &mut dyn Write, items: &[Diagnostic]) -> io::Result<()> {
    for d in items {
        writeln!(out, "  {d}")?;
    }
    Ok(())
}

impl Render for ValidationResult {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        let verdict = if self.valid { "valid" } else { "invalid" };
        writeln!(
            out,
            "{verdict}: {} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        diagnostics(out, &self.errors)?;
        diagnostics(out, &self.warnings)
    }
}

impl Render for FixResult {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        if !self.fixed {
            writeln!(out, "// nothing to fix")?;
        }
        for change in &self.changes {
            writeln!(out, "// fixed: {change}")?;
        }
        write_script(out, self.script.as_str())
    }
}

impl Render for FormatResult {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        for change in &self.changes {
            writeln!(out, "// {change}")?;
        }
        for warning in &self.warnings {
            writeln!(out, "// {warning}")?;
        }
        write_script(out, self.formatted.as_str())
    }
}

impl Render for PipelineReport {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "before: ")?;
        self.initial.render(out)?;
        if let Some(after) = &self.revalidated {
            write!(out, "after fix: ")?;
            after.render(out)?;
        }
        if let Some(fix) = &self.fix {
            for change in &fix.changes {
                writeln!(out, "// fixed: {change}")?;
            }
        }
        self.formatted.render(out)
    }
}

impl Render for ScriptVersionRecord {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, None, self)?;
        write_script(out, &self.content)
    }
}

impl Render for [ScriptVersionRecord] {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        for (index, record) in self.iter().enumerate() {
            header(out, Some(index), record)?;
        }
        Ok(())
    }
}

impl Render for Vec<ScriptVersionRecord> {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        self.as_slice().render(out)
    }
}

/// Diff lines, one per row.
impl Render for [String] {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.is_empty() {
            writeln!(out, "no differences")?;
        }
        for line in self {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

impl Render for Vec<String> {
    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        self.as_slice().render(out)
    }
}

fn header(out: &mut dyn Write, index: Option<usize>, record: &ScriptVersionRecord) -> io::Result<()> {
    if let Some(index) = index {
        write!(out, "#{index} ")?;
    }
    write!(
        out,
        "{} {} {} {}",
        record.id,
        record.timestamp.to_rfc3339(),
        record.version,
        if record.valid { "valid" } else { "invalid" }
    )?;
    match &record.notes {
        Some(notes) => writeln!(out, " ({notes})"),
        None => writeln!(out),
    }
}

fn write_script(out: &mut dyn Write, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.is_empty() && !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}
