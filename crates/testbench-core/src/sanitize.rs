//! Normalization of model-generated shell text into runnable scripts.
//!
//! The rewrites are textual regex substitutions, not a shell parser. They
//! target the handful of bash-isms that break BusyBox `sh` most often.

use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const SH_SHEBANG: &str = "#!/bin/sh";

/// Which script is being sanitized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptProfile {
    Analysis,
    /// Guarantees `set -e` directly after the interpreter line.
    Install,
    /// Forces the `/bin/sh` interpreter (flags are kept) and rewrites
    /// bash-only constructs.
    TestRun,
}

/// Interpreter path of a `#!` line, without its arguments.
fn interpreter(shebang: &str) -> Option<&str> {
    shebang.strip_prefix("#!")?.split_whitespace().next()
}

/// Normalize `raw` for the given profile. Never fails.
///
/// `sanitize(&sanitize(s, p), p) == sanitize(s, p)` holds for well-formed
/// scripts.
pub fn sanitize(raw: &str, profile: ScriptProfile) -> String {
    let body = strip_code_fences(raw);
    let mut lines: Vec<String> = body.lines().map(str::to_string).collect();

    let has_interpreter = lines.first().is_some_and(|l| l.starts_with("#!"));
    if !has_interpreter {
        lines.insert(0, SH_SHEBANG.to_string());
    } else if profile == ScriptProfile::TestRun && interpreter(&lines[0]) != Some("/bin/sh") {
        lines[0] = SH_SHEBANG.to_string();
    }

    if profile == ScriptProfile::Install {
        let has_set_e = lines.get(1).is_some_and(|l| l.contains("set -e"));
        if !has_set_e {
            lines.insert(1, "set -e".to_string());
        }
    }

    let script = lines.join("\n");
    match profile {
        ScriptProfile::TestRun => rewrite_bashisms(&script),
        _ => script,
    }
}

/// Remove a surrounding markdown code fence and its language tag line.
///
/// Text outside the first fenced block is discarded. Unfenced text is only
/// trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let text = raw.trim();
    let Some(open) = text.find("```") else {
        return text.to_string();
    };

    let after_open = &text[open + 3..];
    let inner = match after_open.find("```") {
        Some(close) => &after_open[..close],
        None => after_open,
    };

    let inner = match inner.split_once('\n') {
        Some((tag, rest)) if is_fence_tag(tag) => rest,
        None if is_fence_tag(inner) => "",
        _ => inner,
    };
    inner.trim().to_string()
}

fn is_fence_tag(tag: &str) -> bool {
    matches!(
        tag.trim().to_lowercase().as_str(),
        "" | "sh" | "bash" | "shell" | "zsh" | "console"
    )
}

struct Rewrites {
    declare_array: Regex,
    empty_index: Regex,
    numeric_index: Regex,
    double_bracket: Regex,
    arith_expansion: Regex,
    arith_step: Regex,
    arith_compound: Regex,
    let_step: Regex,
    let_compound: Regex,
    self_increment: Regex,
}

fn compile(pattern: &str) -> Regex {
    // Patterns are literals below; a failure here is a programming error.
    Regex::new(pattern).expect("sanitizer pattern must compile")
}

fn rewrites() -> &'static Rewrites {
    static REWRITES: OnceLock<Rewrites> = OnceLock::new();
    REWRITES.get_or_init(|| Rewrites {
        declare_array: compile(r"declare\s+-[aA]\s+[A-Za-z_][A-Za-z0-9_]*"),
        empty_index: compile(r"[A-Za-z_][A-Za-z0-9_]*\[\]"),
        numeric_index: compile(r"\b([A-Za-z_][A-Za-z0-9_]*)\[([0-9]+)\]"),
        double_bracket: compile(r"\[\[\s+(.*?)\s+\]\]"),
        arith_expansion: compile(r"\$\(\(\s*(.*?)\s*\)\)"),
        arith_step: compile(r"\(\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*(\+\+|--)\s*\)\)"),
        arith_compound: compile(
            r"\(\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*([+\-])=\s*(\$?[A-Za-z0-9_]+)\s*\)\)",
        ),
        let_step: compile(r#"\blet\s+"?([A-Za-z_][A-Za-z0-9_]*)(\+\+|--)"?"#),
        let_compound: compile(
            r#"\blet\s+"?([A-Za-z_][A-Za-z0-9_]*)\s*([+\-])=\s*(\$?[A-Za-z0-9_]+)"?"#,
        ),
        self_increment: compile(r"\b([A-Za-z_][A-Za-z0-9_]*)=\$([A-Za-z_][A-Za-z0-9_]*)\+\+"),
    })
}

const NO_ARRAYS: &str = "# No arrays in sh";

fn rewrite_bashisms(script: &str) -> String {
    let rw = rewrites();

    let s = rw.declare_array.replace_all(script, NO_ARRAYS);
    let s = rw.empty_index.replace_all(&s, NO_ARRAYS);
    let s = rw.numeric_index.replace_all(&s, "${1}_${2}");
    let s = rw.double_bracket.replace_all(&s, "[ ${1} ]");
    let s = rw
        .arith_expansion
        .replace_all(&s, |caps: &Captures| format!("$(expr {})", expr_operands(&caps[1])));
    let s = rw.arith_step.replace_all(&s, |caps: &Captures| {
        step_assignment(&caps[1], step_operator(&caps[2]), "1")
    });
    let s = rw.arith_compound.replace_all(&s, |caps: &Captures| {
        step_assignment(&caps[1], &caps[2], caps[3].trim_start_matches('$'))
    });
    let s = rw.let_step.replace_all(&s, |caps: &Captures| {
        step_assignment(&caps[1], step_operator(&caps[2]), "1")
    });
    let s = rw.let_compound.replace_all(&s, |caps: &Captures| {
        step_assignment(&caps[1], &caps[2], caps[3].trim_start_matches('$'))
    });
    let s = rw.self_increment.replace_all(&s, |caps: &Captures| {
        if caps[1] == caps[2] {
            step_assignment(&caps[1], "+", "1")
        } else {
            caps[0].to_string()
        }
    });

    s.into_owned()
}

fn step_operator(step: &str) -> &'static str {
    if step == "--" {
        "-"
    } else {
        "+"
    }
}

/// `x=$(expr $x + 1)`; a non-numeric amount is treated as a variable.
fn step_assignment(var: &str, op: &str, amount: &str) -> String {
    let amount = if amount.chars().all(|c| c.is_ascii_digit()) {
        amount.to_string()
    } else {
        format!("${amount}")
    };
    format!("{var}=$(expr ${var} {op} {amount})")
}

/// Turn an arithmetic expression into space-separated `expr` operands.
fn expr_operands(expression: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut operand = String::new();

    let flush = |operand: &mut String, tokens: &mut Vec<String>| {
        if operand.is_empty() {
            return;
        }
        let starts_ident = operand
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if starts_ident {
            tokens.push(format!("${operand}"));
        } else {
            tokens.push(operand.clone());
        }
        operand.clear();
    };

    for c in expression.chars() {
        match c {
            '+' | '-' | '/' | '%' => {
                flush(&mut operand, &mut tokens);
                tokens.push(c.to_string());
            }
            '*' => {
                flush(&mut operand, &mut tokens);
                tokens.push("\\*".to_string());
            }
            '(' => {
                flush(&mut operand, &mut tokens);
                tokens.push("\\(".to_string());
            }
            ')' => {
                flush(&mut operand, &mut tokens);
                tokens.push("\\)".to_string());
            }
            c if c.is_whitespace() => flush(&mut operand, &mut tokens),
            c => operand.push(c),
        }
    }
    flush(&mut operand, &mut tokens);
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_and_language_tag() {
        let raw = "```bash\necho hi\n```";
        assert_eq!(sanitize(raw, ScriptProfile::Analysis), "#!/bin/sh\necho hi");
    }

    #[test]
    fn keeps_existing_interpreter_for_analysis() {
        let raw = "#!/usr/bin/env bash\necho hi";
        assert_eq!(sanitize(raw, ScriptProfile::Analysis), raw);
    }

    #[test]
    fn install_profile_inserts_set_e() {
        assert_eq!(
            sanitize("pip install -r requirements.txt", ScriptProfile::Install),
            "#!/bin/sh\nset -e\npip install -r requirements.txt"
        );
        assert_eq!(
            sanitize("#!/bin/sh\napk add gcc", ScriptProfile::Install),
            "#!/bin/sh\nset -e\napk add gcc"
        );
        let already = "#!/bin/sh\nset -eu\napk add gcc";
        assert_eq!(sanitize(already, ScriptProfile::Install), already);
    }

    #[test]
    fn test_run_profile_replaces_interpreter() {
        let out = sanitize("#!/bin/bash\necho ok", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\necho ok");
        let out = sanitize("#!/usr/bin/env bash -e\necho ok", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\necho ok");
    }

    #[test]
    fn test_run_profile_keeps_sh_flags() {
        let raw = "#!/bin/sh -e\necho ok";
        assert_eq!(sanitize(raw, ScriptProfile::TestRun), raw);
        let spaced = "#! /bin/sh -eu\necho ok";
        assert_eq!(sanitize(spaced, ScriptProfile::TestRun), spaced);
    }

    #[test]
    fn comments_out_array_declarations() {
        let out = sanitize("declare -a results\nfiles[]=x", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\n# No arrays in sh\n# No arrays in sh=x");
    }

    #[test]
    fn numeric_index_becomes_suffix() {
        let out = sanitize("echo ${arr[0]} $res[12]", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\necho ${arr_0} $res_12");
    }

    #[test]
    fn double_brackets_become_single() {
        let out = sanitize("if [[ -f \"$f\" ]]; then echo y; fi", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\nif [ -f \"$f\" ]; then echo y; fi");
    }

    #[test]
    fn arithmetic_expansion_uses_expr() {
        let out = sanitize("total=$((passed+failed*2))", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\ntotal=$(expr $passed + $failed \\* 2)");

        let out = sanitize("n=$(( $a - 1 ))", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\nn=$(expr $a - 1)");
    }

    #[test]
    fn increments_become_expr_assignments() {
        let out = sanitize(
            "(( passed++ ))\n((failed--))\n(( total += 3 ))\nlet count++\nx=$x++",
            ScriptProfile::TestRun,
        );
        assert_eq!(
            out,
            "#!/bin/sh\n\
             passed=$(expr $passed + 1)\n\
             failed=$(expr $failed - 1)\n\
             total=$(expr $total + 3)\n\
             count=$(expr $count + 1)\n\
             x=$(expr $x + 1)"
        );
    }

    #[test]
    fn self_increment_requires_same_variable() {
        let out = sanitize("x=$y++", ScriptProfile::TestRun);
        assert_eq!(out, "#!/bin/sh\nx=$y++");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let raw = "```sh\n#!/bin/bash\ndeclare -A map\n[[ -n $a ]] && echo $((a*b))\n(( i++ ))\nlet j+=2\n```";
        for profile in [
            ScriptProfile::Analysis,
            ScriptProfile::Install,
            ScriptProfile::TestRun,
        ] {
            let once = sanitize(raw, profile);
            assert_eq!(sanitize(&once, profile), once, "profile {profile:?}");
        }
    }

    #[test]
    fn empty_input_yields_bare_shebang() {
        assert_eq!(sanitize("", ScriptProfile::Analysis), "#!/bin/sh");
        assert_eq!(sanitize("  ", ScriptProfile::Install), "#!/bin/sh\nset -e");
    }

    #[test]
    fn prose_around_fence_is_dropped() {
        let raw = "Here is the script:\n```\nls -la\n```\nHope this helps.";
        assert_eq!(strip_code_fences(raw), "ls -la");
    }
}
