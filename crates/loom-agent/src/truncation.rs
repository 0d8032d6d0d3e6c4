use std::collections::HashMap;

pub const DEFAULT_TOOL_OUTPUT_CHARS: usize = 20_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncationMode {
    HeadTail,
    Tail,
}

/// Per-tool caps applied to tool output before it is fed back to the backend.
/// Keys are qualified tool names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLimits {
    pub chars: HashMap<String, usize>,
    pub lines: HashMap<String, usize>,
    pub default_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            chars: HashMap::from([
                ("Read".to_string(), 50_000),
                ("Bash".to_string(), 30_000),
                ("Grep".to_string(), 20_000),
                ("Glob".to_string(), 20_000),
                ("WebSearch".to_string(), 20_000),
                ("Edit".to_string(), 10_000),
                ("Write".to_string(), 1_000),
            ]),
            lines: HashMap::from([
                ("Bash".to_string(), 256),
                ("Grep".to_string(), 200),
                ("Glob".to_string(), 500),
            ]),
            default_chars: DEFAULT_TOOL_OUTPUT_CHARS,
        }
    }
}

pub fn default_truncation_mode_for_tool(tool_name: &str) -> TruncationMode {
    match tool_name {
        "Grep" | "Glob" | "Edit" | "Write" => TruncationMode::Tail,
        _ => TruncationMode::HeadTail,
    }
}

pub fn truncate_tool_output(output: &str, tool_name: &str, limits: &OutputLimits) -> String {
    let max_chars = limits
        .chars
        .get(tool_name)
        .copied()
        .unwrap_or(limits.default_chars);
    let mode = default_truncation_mode_for_tool(tool_name);
    let mut truncated = truncate_chars(output, max_chars, mode);

    if let Some(max_lines) = limits.lines.get(tool_name).copied() {
        truncated = truncate_lines(&truncated, max_lines);
    }

    truncated
}

pub fn truncate_chars(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let char_count = output.chars().count();
    if char_count <= max_chars {
        return output.to_string();
    }

    let removed = char_count.saturating_sub(max_chars);
    match mode {
        TruncationMode::HeadTail => {
            let head = max_chars / 2;
            let tail = max_chars.saturating_sub(head);
            format!(
                "{}\n\n[output truncated: {} characters removed from the middle]\n\n{}",
                take_head(output, head),
                removed,
                take_tail(output, tail)
            )
        }
        TruncationMode::Tail => format!(
            "[output truncated: first {} characters removed]\n\n{}",
            removed,
            take_tail(output, max_chars)
        ),
    }
}

pub fn truncate_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max_lines {
        return output.to_string();
    }

    let head_count = max_lines / 2;
    let tail_count = max_lines.saturating_sub(head_count);
    let omitted = lines.len().saturating_sub(head_count + tail_count);

    let head = lines[..head_count].join("\n");
    let tail = lines[lines.len() - tail_count..].join("\n");
    format!("{head}\n[... {omitted} lines omitted ...]\n{tail}")
}

fn take_head(input: &str, char_count: usize) -> String {
    input.chars().take(char_count).collect()
}

fn take_tail(input: &str, char_count: usize) -> String {
    let total = input.chars().count();
    input
        .chars()
        .skip(total.saturating_sub(char_count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_head_tail_keeps_both_ends() {
        let output = truncate_chars("abcdefghij", 6, TruncationMode::HeadTail);
        assert!(output.starts_with("abc"));
        assert!(output.ends_with("hij"));
        assert!(output.contains("4 characters removed"));
    }

    #[test]
    fn truncate_lines_limits_visible_lines() {
        let output = truncate_lines("1\n2\n3\n4\n5\n6", 4);
        assert_eq!(output, "1\n2\n[... 2 lines omitted ...]\n5\n6");
    }

    #[test]
    fn unknown_tool_uses_default_char_limit() {
        let limits = OutputLimits {
            default_chars: 4,
            ..OutputLimits::default()
        };
        let output = truncate_tool_output("0123456789", "mcp__x__y", &limits);
        assert!(output.contains("output truncated"));
        assert_eq!(truncate_tool_output("0123", "mcp__x__y", &limits), "0123");
    }
}
