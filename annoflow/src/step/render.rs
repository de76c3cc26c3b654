//! Shell rendering of a step list.
//!
//! The executor never runs this text. It exists so operators can read, or run
//! by hand, exactly what a run would do, with the same marker semantics.

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use super::{Step, StepAction};
use crate::plan::RunLayout;

#[allow(clippy::expect_used)]
static SHELL_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./=:,+@%-]+$").expect("valid shell-safe pattern"));

/// Renders steps as a resumable bash script.
///
/// Builtin steps are delegated to `builtin_invoker` (typically
/// `annoflow step --config <file>`), followed by the step name.
#[must_use]
pub fn render_script(steps: &[Step], layout: &RunLayout, builtin_invoker: &str) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "#!/usr/bin/env bash");
    let _ = writeln!(script, "# Completed steps leave a marker in the status directory and are skipped on rerun.");
    let _ = writeln!(script, "set -u");
    let _ = writeln!(script);
    let _ = writeln!(script, "OK_MARKER={}", quote_path(&layout.ok_marker()));
    let _ = writeln!(script, "WRONG_MARKER={}", quote_path(&layout.wrong_marker()));
    let _ = writeln!(script, "mkdir -p {}", quote_path(&layout.status_dir()));
    let _ = writeln!(script);
    let _ = writeln!(script, r#"if [ -e "$OK_MARKER" ] || [ -e "$WRONG_MARKER" ]; then"#);
    let _ = writeln!(script, r#"    echo "run already finished; clean or clear WRONG first" >&2"#);
    let _ = writeln!(script, "    exit 0");
    let _ = writeln!(script, "fi");
    let _ = writeln!(script);
    let _ = writeln!(script, "run_step() {{");
    let _ = writeln!(script, r#"    local name="$1" marker="$2""#);
    let _ = writeln!(script, "    shift 2");
    let _ = writeln!(script, r#"    if [ -e "$marker" ]; then"#);
    let _ = writeln!(script, r#"        echo "skip $name""#);
    let _ = writeln!(script, "        return 0");
    let _ = writeln!(script, "    fi");
    let _ = writeln!(script, r#"    "$@""#);
    let _ = writeln!(script, "    local code=$?");
    let _ = writeln!(script, r#"    if [ "$code" -ne 0 ]; then"#);
    let _ = writeln!(script, r#"        printf 'step=%s exit_code=%s\n' "$name" "$code" > "$WRONG_MARKER""#);
    let _ = writeln!(script, r#"        exit "$code""#);
    let _ = writeln!(script, "    fi");
    let _ = writeln!(script, r#"    touch "$marker""#);
    let _ = writeln!(script, "}}");

    for step in steps {
        let _ = writeln!(script);
        let _ = writeln!(script, "# {}", step.name);

        let dirs: BTreeSet<&Path> = step.outputs.iter().filter_map(|p| p.parent()).collect();
        for dir in dirs {
            let _ = writeln!(script, "mkdir -p {}", quote_path(dir));
        }

        let mut words = vec![
            quote(&step.name),
            quote_path(&layout.step_marker(&step.name)),
        ];
        match &step.action {
            StepAction::Command { program, args } => {
                words.push(quote(program));
                words.extend(args.iter().map(|a| quote(a)));
            }
            StepAction::Builtin(_) => {
                words.push(builtin_invoker.to_string());
                words.push(quote(&step.name));
            }
        }
        let _ = writeln!(script, "run_step {}", words.join(" "));
    }

    let _ = writeln!(script);
    let _ = writeln!(script, r#"touch "$OK_MARKER""#);
    script
}

fn quote(word: &str) -> String {
    if SHELL_SAFE.is_match(word) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}
