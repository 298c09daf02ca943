//! Deck normalizer
//!
//! Turns a free-form, possibly interactive deck into a batch-executable one:
//! folds `+` continuations into logical lines, rewrites `.include`/`.lib`
//! and `input_file="…"` paths to absolute form, strips the
//! `.control`…`.endc` scripting block while harvesting the transient command
//! and the `wrdata` capture signals embedded in it, and finally synthesizes
//! the `.tran`, `.save` and `.end` directives the batch loader needs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::path::{lexical_normalize, resolve_path_token};
use super::text::{contains_ci, is_quoted, maybe_quote, starts_with_ci, unquote};
use crate::Result;

/// A batch-executable deck plus the output signals its capture commands
/// requested, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct NormalizedDeck {
    pub lines: Vec<String>,
    pub signals: Vec<String>,
}

impl NormalizedDeck {
    /// The deck as one newline-terminated string.
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Fold continuation lines (leading `+`) into the preceding line.
///
/// Continuation content is trimmed and space-joined. A continuation with no
/// predecessor is kept as a normal line.
pub fn to_logical_lines(physical: &[String]) -> Vec<String> {
    let mut logical: Vec<String> = Vec::with_capacity(physical.len());
    for raw in physical {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix('+')
            && let Some(last) = logical.last_mut()
        {
            last.push(' ');
            last.push_str(rest.trim());
        } else {
            logical.push(raw.clone());
        }
    }
    logical
}

/// Ordered signal list with case-insensitive de-duplication.
#[derive(Default)]
struct SignalSet {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl SignalSet {
    fn append_unique(&mut self, signal: &str) {
        if signal.is_empty() {
            return;
        }
        if self.seen.insert(signal.to_ascii_lowercase()) {
            self.names.push(signal.to_string());
        }
    }
}

/// Pull probe tokens out of a `wrdata` capture command.
///
/// The first token after `wrdata` is always the output file and is consumed
/// unconditionally, even when it looks like a probe. Remaining tokens are
/// kept iff they are voltage (`v(…`) or current (`i(…`) probes; `time` is
/// implicit in every capture and never enters the signal list.
fn harvest_wrdata_signals(line: &str, signals: &mut SignalSet) {
    let mut tokens = line.split_whitespace();
    for token in tokens.by_ref() {
        if token.eq_ignore_ascii_case("wrdata") {
            break;
        }
    }
    if tokens.next().is_none() {
        return;
    }
    for token in tokens {
        if starts_with_ci(token, "v(") || starts_with_ci(token, "i(") {
            signals.append_unique(token);
        }
    }
}

/// Rewrite the path argument of a `.include` or `.lib` directive.
///
/// Quoting style round-trips, and `.lib` keeps its trailing section token.
/// A directive with no path argument passes through unchanged.
fn rewrite_include_or_lib(line: &str, base_dir: &Path, root_override: &str) -> String {
    let trimmed = line.trim();
    let is_include = starts_with_ci(trimmed, ".include");
    let is_lib = starts_with_ci(trimmed, ".lib");
    if !is_include && !is_lib {
        return line.to_string();
    }

    let mut tokens = trimmed.split_whitespace();
    let Some(directive) = tokens.next() else {
        return line.to_string();
    };
    let Some(path_token) = tokens.next() else {
        return line.to_string();
    };

    let quoted = is_quoted(path_token);
    let resolved = resolve_path_token(unquote(path_token), base_dir, root_override);
    debug!(directive, path = %resolved, "rewrote directive path");

    let mut rebuilt = format!("{directive} {}", maybe_quote(&resolved, quoted));
    if is_lib && let Some(section) = tokens.next() {
        rebuilt.push(' ');
        rebuilt.push_str(section);
    }
    rebuilt
}

/// Rewrite an embedded `input_file="…"` attribute value in place.
fn rewrite_input_file_attr(line: &str, base_dir: &Path, root_override: &str) -> String {
    const KEY: &str = "input_file=\"";
    let Some(start) = line.find(KEY) else {
        return line.to_string();
    };
    let value_start = start + KEY.len();
    let Some(rel_end) = line[value_start..].find('"') else {
        return line.to_string();
    };
    let value_end = value_start + rel_end;
    let resolved = resolve_path_token(&line[value_start..value_end], base_dir, root_override);
    format!("{}{}{}", &line[..value_start], resolved, &line[value_end..])
}

/// Normalize raw deck lines into a batch-executable deck.
///
/// `base_dir` is the directory containing the deck; relative path tokens are
/// resolved against it. `root_override`, when non-empty, takes precedence
/// over the `PDK_ROOT` environment variable for placeholder expansion.
pub fn normalize_deck(
    raw_lines: &[String],
    base_dir: &Path,
    root_override: &str,
) -> NormalizedDeck {
    let logical = to_logical_lines(raw_lines);

    let mut lines: Vec<String> = Vec::with_capacity(logical.len() + 3);
    let mut signals = SignalSet::default();
    let mut inside_control = false;
    let mut has_tran = false;
    let mut has_end = false;
    let mut hoisted_tran: Option<String> = None;

    for original in &logical {
        let trimmed = original.trim();

        if starts_with_ci(trimmed, ".control") {
            inside_control = true;
            continue;
        }
        if inside_control {
            // An unterminated block runs to end of input.
            if starts_with_ci(trimmed, ".endc") {
                inside_control = false;
                continue;
            }
            if hoisted_tran.is_none() {
                if starts_with_ci(trimmed, ".tran ") {
                    hoisted_tran = Some(trimmed.to_string());
                } else if starts_with_ci(trimmed, "tran ") {
                    hoisted_tran = Some(format!(".tran {}", trimmed[5..].trim_start()));
                }
            }
            if contains_ci(trimmed, "wrdata") {
                harvest_wrdata_signals(trimmed, &mut signals);
            }
            continue;
        }

        let rewritten = rewrite_input_file_attr(
            &rewrite_include_or_lib(original, base_dir, root_override),
            base_dir,
            root_override,
        );
        let rewritten_trimmed = rewritten.trim();
        if starts_with_ci(rewritten_trimmed, ".tran ") {
            has_tran = true;
        }
        if rewritten_trimmed.eq_ignore_ascii_case(".end") {
            has_end = true;
        }
        lines.push(rewritten);
    }

    if !has_tran && let Some(tran) = hoisted_tran {
        lines.push(tran);
    }
    if !signals.names.is_empty() {
        let mut save = String::from(".save time");
        for signal in &signals.names {
            save.push(' ');
            save.push_str(signal);
        }
        lines.push(save);
    }
    if !has_end {
        lines.push(".end".to_string());
    }

    debug!(
        lines = lines.len(),
        signals = signals.names.len(),
        "normalized deck"
    );
    NormalizedDeck {
        lines,
        signals: signals.names,
    }
}

/// Read a deck from disk and normalize it against its own directory.
pub fn normalize_file(path: &Path, root_override: &str) -> Result<NormalizedDeck> {
    let content = fs::read_to_string(path)?;
    let physical: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();

    let mut deck_path = path.to_path_buf();
    if deck_path.is_relative()
        && let Ok(cwd) = std::env::current_dir()
    {
        deck_path = cwd.join(deck_path);
    }
    let deck_path = lexical_normalize(&deck_path);
    let base_dir = deck_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(normalize_deck(&physical, &base_dir, root_override))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn continuations_fold_into_the_previous_line() {
        let logical = to_logical_lines(&deck(&[
            "V1 in 0 PULSE(0 1.8 0",
            "+ 1n 1n 5n 10n)",
            "R1 in out 1k",
        ]));
        assert_eq!(
            logical,
            vec!["V1 in 0 PULSE(0 1.8 0 1n 1n 5n 10n)", "R1 in out 1k"]
        );
        // No logical line other than the first may start with the marker.
        assert!(logical.iter().skip(1).all(|l| !l.trim().starts_with('+')));
    }

    #[test]
    fn leading_continuation_is_kept_as_a_normal_line() {
        let logical = to_logical_lines(&deck(&["+ orphan", "R1 a b 1k"]));
        assert_eq!(logical, vec!["+ orphan", "R1 a b 1k"]);
    }

    #[test]
    fn capture_signals_deduplicate_case_insensitively() {
        let out = normalize_deck(
            &deck(&[
                "* dedup",
                ".control",
                "wrdata out.csv v(in) V(IN) time v(out)",
                ".endc",
            ]),
            Path::new("/decks"),
            "",
        );
        assert_eq!(out.signals, vec!["v(in)", "v(out)"]);
        assert!(out.lines.contains(&".save time v(in) v(out)".to_string()));
    }

    #[test]
    fn terminator_is_appended_exactly_once_and_last() {
        let out = normalize_deck(&deck(&["R1 a b 1k"]), Path::new("/decks"), "");
        assert_eq!(out.lines.last().map(String::as_str), Some(".end"));
        assert_eq!(out.lines.iter().filter(|l| *l == ".end").count(), 1);

        let with_end = normalize_deck(&deck(&["R1 a b 1k", ".end"]), Path::new("/decks"), "");
        assert_eq!(with_end.lines.iter().filter(|l| *l == ".end").count(), 1);
    }

    #[test]
    fn existing_tran_suppresses_the_hoisted_one() {
        let out = normalize_deck(
            &deck(&[
                "R1 a b 1k",
                ".tran 1n 10n",
                ".control",
                "tran 2n 20n",
                ".endc",
                ".end",
            ]),
            Path::new("/decks"),
            "",
        );
        let trans: Vec<_> = out
            .lines
            .iter()
            .filter(|l| l.trim().to_ascii_lowercase().starts_with(".tran "))
            .collect();
        assert_eq!(trans, vec![".tran 1n 10n"]);
    }

    #[test]
    fn unterminated_control_block_swallows_the_rest() {
        let out = normalize_deck(
            &deck(&["R1 a b 1k", ".control", "tran 1n 10n", "R2 b c 1k"]),
            Path::new("/decks"),
            "",
        );
        // Body keeps only the line before the block; the hoisted tran and
        // terminator are still synthesized.
        assert_eq!(out.lines, vec!["R1 a b 1k", ".tran 1n 10n", ".end"]);
    }

    #[test]
    fn include_quoting_round_trips() {
        let out = normalize_deck(
            &deck(&[
                ".include \"$PDK_ROOT/models.inc\"",
                ".include $PDK_ROOT/corners.inc",
            ]),
            Path::new("/decks"),
            "/pdk",
        );
        assert_eq!(out.lines[0], ".include \"/pdk/models.inc\"");
        assert_eq!(out.lines[1], ".include /pdk/corners.inc");
    }

    #[test]
    fn lib_directive_keeps_its_section() {
        let out = normalize_deck(
            &deck(&[".lib $PDK_ROOT/sky130.lib.spice tt"]),
            Path::new("/decks"),
            "/pdk",
        );
        assert_eq!(out.lines[0], ".lib /pdk/sky130.lib.spice tt");
    }

    #[test]
    fn directive_without_path_passes_through() {
        let out = normalize_deck(&deck(&[".include", ".end"]), Path::new("/decks"), "");
        assert_eq!(out.lines[0], ".include");
    }

    #[test]
    fn input_file_attribute_is_rewritten() {
        let out = normalize_deck(
            &deck(&["A1 in out filesrc input_file=\"stimulus/wave.txt\" dc=0"]),
            Path::new("/decks/ring"),
            "",
        );
        assert_eq!(
            out.lines[0],
            "A1 in out filesrc input_file=\"/decks/ring/stimulus/wave.txt\" dc=0"
        );
    }

    #[test]
    fn wrdata_file_token_is_consumed_even_when_probe_shaped() {
        let out = normalize_deck(
            &deck(&[".control", "wrdata v(in) v(out)", ".endc"]),
            Path::new("/decks"),
            "",
        );
        // First post-command token is the file path, unconditionally.
        assert_eq!(out.signals, vec!["v(out)"]);
    }

    #[test]
    fn file_relative_includes_resolve_against_the_deck_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let deck_path = dir.path().join("top.spice");
        fs::write(&deck_path, ".include models/nmos.inc\n.end\n").unwrap();

        let out = normalize_file(&deck_path, "").unwrap();
        let expected = dir.path().join("models/nmos.inc");
        assert_eq!(
            out.lines[0],
            format!(".include {}", expected.display())
        );
    }

    #[test]
    fn end_to_end_interactive_deck() {
        let dir = tempfile::TempDir::new().unwrap();
        let deck_path = dir.path().join("pipeline_test.spice");
        fs::write(
            &deck_path,
            "* test deck\n\
             .include \"$PDK_ROOT/models.inc\"\n\
             V1 in 0 PULSE(0 1.8 0\n\
             + 1n 1n 5n 10n)\n\
             R1 in out 1k\n\
             C1 out 0 1p\n\
             .control\n\
             tran 0.1n 20n\n\
             wrdata out.csv v(in) v(out)\n\
             .endc\n",
        )
        .unwrap();

        let out = normalize_file(&deck_path, "/pdk").unwrap();
        let text = out.to_text();

        assert!(text.contains(".include \"/pdk/models.inc\""));
        assert!(!text.contains(".control"));
        assert!(!text.contains(".endc"));
        assert!(text.contains(".tran 0.1n 20n"));
        assert!(text.contains(".save time v(in) v(out)"));
        assert_eq!(out.lines.last().map(String::as_str), Some(".end"));
        assert_eq!(out.signals, vec!["v(in)", "v(out)"]);
    }
}
