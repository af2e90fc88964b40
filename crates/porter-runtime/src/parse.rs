//! Suffix grammar on inbound content: a trailing `--codex` / `--gemini`
//! whole-word token routes the prompt to an external CLI; `--vision`
//! anywhere (whole-word, case-insensitive) enables screen capture for the
//! turn. All recognized tokens are stripped from the prompt.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCliRoute {
    pub name: String,
    pub suffix: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    pub prompt: String,
    pub vision_enabled: bool,
    pub external_cli: Option<ExternalCliRoute>,
}

fn has_suffix_token_ci(text: &str, token_lower: &str) -> bool {
    if text.len() < token_lower.len() {
        return false;
    }
    let start = text.len() - token_lower.len();
    if !text.is_char_boundary(start) || !text[start..].eq_ignore_ascii_case(token_lower) {
        return false;
    }
    start == 0 || text[..start].ends_with(|c: char| c.is_whitespace())
}

/// Remove every whole-word, case-insensitive occurrence of `token_lower`.
/// Returns whether anything was removed.
pub(crate) fn strip_token_whole_word_ci(text: &mut String, token_lower: &str) -> bool {
    let mut found = false;
    let mut pos = 0;
    while pos < text.len() {
        let lower = text.to_lowercase();
        let Some(at) = lower[pos..].find(token_lower).map(|i| i + pos) else {
            break;
        };
        let end = at + token_lower.len();
        let left_ok = at == 0 || text[..at].ends_with(|c: char| c.is_whitespace());
        let right_ok = end >= text.len() || text[end..].starts_with(|c: char| c.is_whitespace());
        if !left_ok || !right_ok {
            pos = end;
            continue;
        }
        text.replace_range(at..end, "");
        found = true;
        pos = at;
    }
    if found {
        *text = text.trim().to_string();
    }
    found
}

pub fn parse_request(content: &str) -> ParsedRequest {
    let mut out = ParsedRequest {
        prompt: content.trim().to_string(),
        ..Default::default()
    };
    if out.prompt.is_empty() {
        return out;
    }

    for (name, suffix) in [("codex", "--codex"), ("gemini", "--gemini")] {
        if has_suffix_token_ci(&out.prompt, suffix) {
            let prompt = out.prompt[..out.prompt.len() - suffix.len()]
                .trim()
                .to_string();
            out.external_cli = Some(ExternalCliRoute {
                name: name.to_string(),
                suffix: suffix.to_string(),
                prompt,
            });
            out.prompt = out.external_cli.as_ref().map(|r| r.prompt.clone()).unwrap_or_default();
            break;
        }
    }

    out.vision_enabled = strip_token_whole_word_ci(&mut out.prompt, "--vision");
    if let Some(route) = out.external_cli.as_mut() {
        route.prompt = out.prompt.clone();
    }
    out
}
