use anyhow::Result;
use regex::{Captures, Regex};

use crate::util::compile;

pub const TOKEN_PREFIX: &str = "MATH_TOKEN_";

/// Hides balanced math containers behind opaque tokens so text rewriting
/// never touches notation. Unbalanced delimiters are left alone.
pub struct MathGuard {
    containers: Vec<Regex>,
    token: Regex,
}

/// Token table for one fragment. Lives from `protect` to `restore`.
#[derive(Debug, Default)]
pub struct MathTable {
    originals: Vec<String>,
}

impl MathGuard {
    pub fn new() -> Result<Self> {
        let containers = [
            (
                r#"(?is)<script[^>]*type\s*=\s*["']math/tex[^"']*["'][^>]*>.*?</script\s*>"#,
                "math script",
            ),
            (r"(?is)<mjx-container\b.*?</mjx-container\s*>", "mjx container"),
            (r"(?is)<math\b.*?</math\s*>", "mathml"),
            (r"(?s)\\\[.*?\\\]", "display bracket math"),
            (r"(?s)\$\$.*?\$\$", "display dollar math"),
            (r"(?s)\\\(.*?\\\)", "inline paren math"),
        ]
        .into_iter()
        .map(|(pattern, label)| compile(pattern, label))
        .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            containers,
            token: compile(r"MATH_TOKEN_(\d+)__", "math token")?,
        })
    }

    pub fn protect(&self, html: &str) -> (String, MathTable) {
        let mut table = MathTable::default();
        let mut current = html.to_string();

        for pattern in &self.containers {
            if !pattern.is_match(&current) {
                continue;
            }
            current = pattern
                .replace_all(&current, |caps: &Captures| table.push(&caps[0]))
                .into_owned();
        }

        (current, table)
    }

    /// Exact reverse of `protect`. A container matched by a later pattern can
    /// enclose tokens of an earlier one, so substitution repeats until no
    /// known token is left; nesting depth is bounded by the table size.
    pub fn restore(&self, html: &str, table: &MathTable) -> String {
        let mut current = html.to_string();
        for _ in 0..=table.len() {
            let mut replaced = 0;
            let next = self
                .token
                .replace_all(&current, |caps: &Captures| {
                    match caps[1].parse::<usize>().ok().and_then(|index| table.originals.get(index)) {
                        Some(original) => {
                            replaced += 1;
                            original.clone()
                        }
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();
            current = next;
            if replaced == 0 {
                break;
            }
        }
        current
    }

    pub fn contains_token(&self, html: &str) -> bool {
        self.token.is_match(html)
    }
}

impl MathTable {
    fn push(&mut self, original: &str) -> String {
        let token = format!("{TOKEN_PREFIX}{}__", self.originals.len());
        self.originals.push(original.to_string());
        token
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    /// Protected math in token order.
    pub fn originals(&self) -> impl Iterator<Item = &str> {
        self.originals.iter().map(String::as_str)
    }
}
