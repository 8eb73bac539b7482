//! Line-oriented assembly output
//!
//! One pushed line is one instruction, label or directive. While an origin
//! is set, lines are suffixed with the originating TAC as a `;;` comment.

use std::io;

/// Assembly line buffer
#[derive(Debug, Clone, Default)]
pub struct AsmOut {
    lines: Vec<String>,
    /// Trailing annotation for lines emitted on behalf of one TAC
    origin: Option<String>,
    /// Whether annotations are written at all
    annotate: bool,
}

impl AsmOut {
    /// Create a buffer; `annotate` enables trailing TAC comments
    pub fn new(annotate: bool) -> Self {
        Self {
            lines: Vec::new(),
            origin: None,
            annotate,
        }
    }

    /// Set (or clear) the TAC text appended to subsequent lines
    pub fn set_origin(&mut self, origin: Option<String>) {
        self.origin = origin;
    }

    /// Emit one instruction (indented)
    pub fn emit(&mut self, instr: impl AsRef<str>) {
        let line = format!("    {}", instr.as_ref());
        self.push_line(line);
    }

    /// Emit a label definition (not indented)
    pub fn label(&mut self, name: impl AsRef<str>) {
        let line = format!("{}:", name.as_ref());
        self.push_line(line);
    }

    /// Emit a comment line verbatim; never annotated
    pub fn comment(&mut self, text: impl AsRef<str>) {
        self.lines.push(format!(";; {}", text.as_ref()));
    }

    /// Emit a pre-rendered block of comment lines (dumps)
    pub fn comment_block(&mut self, block: &str) {
        self.lines.extend(block.lines().map(str::to_string));
    }

    fn push_line(&mut self, line: String) {
        match (&self.origin, self.annotate) {
            (Some(origin), true) => self.lines.push(format!("{}\t\t;; {}", line, origin)),
            _ => self.lines.push(line),
        }
    }

    /// Emitted lines
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of emitted lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if nothing was emitted
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Take the lines emitted so far, leaving the buffer empty
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    /// Whole listing as text, newline-terminated
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Write the listing to a sink
    pub fn write_to<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        for line in &self.lines {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }
}
