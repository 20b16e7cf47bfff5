//! Minimal, deterministic text normalization helpers.

/// Control whitespace that the parser may leave inside extracted text.
fn is_control_ws(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\x0c' | '\x0b')
}

/// Collapse tabs, newlines, carriage returns, form feeds and vertical tabs into
/// single spaces.
///
/// A whitespace run that contains at least one control char becomes one space;
/// runs of plain spaces are left alone.
pub fn normalize_control_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = String::new();
    let mut run_has_control = false;
    for ch in s.chars() {
        if ch == ' ' || is_control_ws(ch) {
            run.push(ch);
            run_has_control |= is_control_ws(ch);
            continue;
        }
        flush_run(&mut out, &mut run, &mut run_has_control);
        out.push(ch);
    }
    flush_run(&mut out, &mut run, &mut run_has_control);
    out
}

fn flush_run(out: &mut String, run: &mut String, has_control: &mut bool) {
    if run.is_empty() {
        return;
    }
    if *has_control {
        out.push(' ');
    } else {
        out.push_str(run);
    }
    run.clear();
    *has_control = false;
}
