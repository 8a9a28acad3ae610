use super::{Diagnostic, Location};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[CODE]: message"
        let heading = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&heading), self.bold(&d.message)));

        if let (Some(label), Some(source)) = (d.labels.first(), &d.source) {
            let Location { line, col, text: line_text } = Location::of(source, label.span.start);

            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);

            out.push_str(&format!("{pad} {pipe}\n"));
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

            // Carets stop at the end of the line.
            let indent = " ".repeat(col.saturating_sub(1));
            let room = line_text.len().saturating_sub(col - 1).max(1);
            let span_len = label.span.end.saturating_sub(label.span.start).clamp(1, room);
            let carets = self.bold_red(&"^".repeat(span_len));
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
            }
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        for note in &d.notes {
            // Multi-line notes (toolchain output) are indented under the marker.
            let mut lines = note.lines();
            if let Some(first) = lines.next() {
                out.push_str(&format!("  {} note: {}\n", self.dim("="), first));
            }
            for rest in lines {
                out.push_str(&format!("      {rest}\n"));
            }
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn plain() -> AnsiRenderer {
        AnsiRenderer { use_color: false }
    }

    fn make_diag(source: &str, start: usize, end: usize) -> Diagnostic {
        Diagnostic::error("expected expression, got )")
            .with_code("ARITH-P001")
            .with_span(Span { start, end }, "here")
            .with_source(source.to_string())
            .with_note("expressions start with a number, '-' or '('")
            .with_suggestion("remove the stray ')'")
    }

    #[test]
    fn render_heading_with_code() {
        let out = plain().render(&make_diag("1 + )", 4, 5));
        assert!(out.starts_with("error[ARITH-P001]: expected expression, got )\n"), "{out}");
    }

    #[test]
    fn render_location_and_snippet() {
        let out = plain().render(&make_diag("1 + )", 4, 5));
        assert!(out.contains("--> 1:5"), "{out}");
        assert!(out.contains("1 | 1 + )"), "{out}");
        assert!(out.contains("  |     ^ here"), "{out}");
    }

    #[test]
    fn render_note_and_suggestion() {
        let out = plain().render(&make_diag("1 + )", 4, 5));
        assert!(out.contains("= note: expressions start"), "{out}");
        assert!(out.contains("= suggestion: remove the stray ')'"), "{out}");
    }

    #[test]
    fn render_multiline_note_indented() {
        let d = Diagnostic::error("toolchain failed").with_note("toolchain output:\na.c:1: error: x\nmore");
        let out = plain().render(&d);
        assert!(out.contains("= note: toolchain output:\n      a.c:1: error: x\n      more\n"), "{out}");
    }

    #[test]
    fn render_no_source_still_works() {
        let out = plain().render(&Diagnostic::error("no free registers"));
        assert_eq!(out, "error: no free registers\n");
    }

    #[test]
    fn render_color_toggle() {
        let d = make_diag("1 + )", 4, 5);
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b["));
        assert!(!plain().render(&d).contains("\x1b["));
    }

    #[test]
    fn render_second_line() {
        let source = "1 + 2\n3 * x";
        let d = Diagnostic::error("unexpected input 'x'")
            .with_span(Span { start: 10, end: 11 }, "")
            .with_source(source.to_string());
        let out = plain().render(&d);
        assert!(out.contains("--> 2:5"), "{out}");
        assert!(out.contains("2 | 3 * x"), "{out}");
    }

    #[test]
    fn caret_length_matches_span() {
        let d = Diagnostic::error("bad")
            .with_span(Span { start: 4, end: 9 }, "")
            .with_source("1 + (2*3".to_string());
        let out = plain().render(&d);
        assert!(out.contains("    ^^^^\n"), "{out}");
        assert!(!out.contains("^^^^^"), "{out}");
    }
}
