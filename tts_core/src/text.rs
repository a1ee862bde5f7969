/// Prepare a sentence for speech: drop markdown decoration the provider
/// would otherwise read out, keep link text, and normalize whitespace.
/// Falls back to the input when cleaning leaves nothing speakable.
pub fn clean_for_speech(text: &str) -> String {
    let mut cleaned = strip_fenced_code(text);

    // Inline code keeps its content.
    cleaned = cleaned.replace('`', "");
    cleaned = strip_links(&cleaned);

    for marker in ["**", "__", "~~", "*", "#"] {
        cleaned = cleaned.replace(marker, "");
    }

    let cleaned = cleaned
        .lines()
        .map(strip_list_marker)
        .collect::<Vec<_>>()
        .join(" ");

    let mut result = String::with_capacity(cleaned.len());
    let mut last_was_space = true;
    for ch in cleaned.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(ch);
            last_was_space = false;
        }
    }

    for mark in [',', '.', '!', '?', ';', ':'] {
        result = result.replace(&format!(" {mark}"), &mark.to_string());
    }

    let result = result.trim();
    if result.is_empty() {
        text.trim().to_string()
    } else {
        result.to_string()
    }
}

fn strip_fenced_code(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find("```") {
        match out[start + 3..].find("```") {
            Some(end) => out.replace_range(start..start + end + 6, " "),
            None => {
                out.truncate(start);
                break;
            }
        }
    }
    out
}

/// `[text](url)` becomes `text`.
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find("](") else {
            break;
        };
        let Some(paren) = after_open[close + 2..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&after_open[..close]);
        rest = &after_open[close + 2 + paren + 1..];
    }
    out.push_str(rest);
    out
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("+ ")) {
        return item;
    }
    if let Some((num, item)) = trimmed.split_once(". ") {
        if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) {
            return item;
        }
    }
    line
}
