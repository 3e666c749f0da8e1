use anyhow::Result;
use regex::{Captures, Regex};

use crate::util::{compile, decode_entities, escape_text};

const PYTHON_KEYWORDS: [&str; 18] = [
    "import ", "from ", "def ", "class ", "return ", "yield ", "try:", "except:", "finally:",
    "with ", "as ", "raise ", "True", "False", "None", "and ", "or ", "not ",
];
const JAVASCRIPT_KEYWORDS: [&str; 7] = ["const ", "let ", "var ", "function ", "async ", "=>", "console."];
const BASH_KEYWORDS: [&str; 7] = ["#!/bin", "$ ", "pip ", "conda ", "sudo ", "apt ", "brew "];

/// Rewrites converter verbatim containers into
/// `<div class="code-wrapper"><pre><code class="language-X">`.
pub struct CodeBlockFormatter {
    existing: Regex,
    sources: Vec<Regex>,
    standalone: Regex,
    mono_span: Regex,
    empty_anchor: Regex,
    tags: Regex,
    python: Vec<Regex>,
}

impl CodeBlockFormatter {
    pub fn new() -> Result<Self> {
        let python = [
            r"(?m)^\s*(?:import|from)\s+\w+",
            r"\bdef\s+\w+\s*\(",
            r"\bclass\s+\w+\s*[:(]",
            r"\b(?:for|while)\s+\w+\s+in\s+",
            r"\b(?:if|elif|else)\s*:",
            r"\breturn\s+",
            r"\b(?:torch|numpy|np|tf|keras|sklearn)\.",
            r"\bself\.",
            r"__\w+__",
            r"\bprint\s*\(",
            r"\blambda\s+",
            r"\bwith\s+.*\s+as\s+",
            r"@\w+",
        ]
        .into_iter()
        .map(|pattern| compile(pattern, "python detection"))
        .collect::<Result<Vec<_>>>()?;

        let sources = vec![
            compile(
                r#"(?s)<div[^>]*class=["'][^"']*verbatim[^"']*["'][^>]*>(.*?)</div>"#,
                "verbatim div",
            )?,
            compile(
                r#"(?s)<pre class=["'][^"']*(?:verbatim|fancyvrb|lstlisting)[^"']*["'][^>]*>(.*?)</pre>"#,
                "verbatim pre",
            )?,
        ];

        Ok(Self {
            existing: compile(
                r#"(?s)<div class="code-wrapper"><pre><code[^>]*>(.*?)</code></pre></div>"#,
                "code wrapper",
            )?,
            sources,
            standalone: compile(r"(?s)<pre([^>]*)>(.*?)</pre>", "standalone pre")?,
            mono_span: compile(
                r#"(?s)<span[^>]*class="[^"]*cmtt-[^"]*"[^>]*>(.*?)</span>"#,
                "monospace span",
            )?,
            empty_anchor: compile(r#"<a[^>]*id="[^"]*"[^>]*></a>"#, "empty code anchor")?,
            tags: compile(r"<[^>]+>", "code tag")?,
            python,
        })
    }

    /// Returns the rewritten markup and the number of blocks it emitted.
    pub fn format(&self, html: &str) -> (String, usize) {
        let mut count = 0;
        let mut out = self
            .existing
            .replace_all(html, |caps: &Captures| {
                count += 1;
                self.render(&caps[1], None)
            })
            .into_owned();

        for source in &self.sources {
            out = source
                .replace_all(&out, |caps: &Captures| {
                    count += 1;
                    self.render(&caps[1], None)
                })
                .into_owned();
        }

        let mut result = String::with_capacity(out.len());
        let mut last = 0;
        for caps in self.standalone.captures_iter(&out) {
            let Some(found) = caps.get(0) else { continue };
            let content = &caps[2];
            let wrapped = out[..found.start()].ends_with("code-wrapper\">");
            if wrapped || content.contains("<code") || content.trim().len() < 5 {
                continue;
            }
            result.push_str(&out[last..found.start()]);
            result.push_str(&self.render(content, Some(&caps[1])));
            last = found.end();
            count += 1;
        }
        result.push_str(&out[last..]);

        (result, count)
    }

    fn render(&self, raw: &str, pre_attrs: Option<&str>) -> String {
        let code = self.clean(raw);
        let language = self.detect_language(&code);
        format!(
            "<div class=\"code-wrapper\"><pre{}><code class=\"language-{language}\">{}</code></pre></div>",
            pre_attrs.unwrap_or(""),
            escape_text(&code)
        )
    }

    /// Plain code text: wrapper spans and anchors dropped, entities decoded,
    /// common indentation removed.
    fn clean(&self, raw: &str) -> String {
        let code = self.mono_span.replace_all(raw, "${1}");
        let code = self.empty_anchor.replace_all(&code, "");
        let code = decode_entities(&code).replace('\u{a0}', " ");
        dedent(&code).trim().to_string()
    }

    pub fn detect_language(&self, code: &str) -> &'static str {
        let plain = self.tags.replace_all(code, "");
        if self.python.iter().any(|pattern| pattern.is_match(&plain))
            || PYTHON_KEYWORDS.iter().any(|keyword| plain.contains(keyword))
        {
            return "python";
        }
        if JAVASCRIPT_KEYWORDS.iter().any(|keyword| plain.contains(keyword)) {
            return "javascript";
        }
        if BASH_KEYWORDS.iter().any(|keyword| plain.contains(keyword)) {
            return "bash";
        }
        "python"
    }
}

fn dedent(code: &str) -> String {
    let indent = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.get(indent..).unwrap_or(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_blocks_become_highlighted_code() {
        let formatter = CodeBlockFormatter::new().expect("formatter");
        let html = concat!(
            "<pre class=\"fancyvrb\" id=\"fancyvrb3\"><a id=\"x1-5\"></a>",
            "<span class=\"cmtt-10\">    def</span><span class=\"cmtt-10\">&nbsp;step(x):</span>\n",
            "<span class=\"cmtt-10\">        return x &lt; 1</span></pre>"
        );

        let (out, count) = formatter.format(html);
        assert_eq!(count, 1);
        assert_eq!(
            out,
            "<div class=\"code-wrapper\"><pre><code class=\"language-python\">def step(x):\n    return x &lt; 1</code></pre></div>"
        );
        assert_eq!(formatter.format(&out).0, out);
    }

    #[test]
    fn language_detection_falls_through_to_bash() {
        let formatter = CodeBlockFormatter::new().expect("formatter");
        assert_eq!(formatter.detect_language("const f = (x) => x * 2;"), "javascript");
        assert_eq!(formatter.detect_language("$ pip install torch"), "bash");
        assert_eq!(formatter.detect_language("x = 1"), "python");
    }

    #[test]
    fn standalone_pre_is_wrapped_once() {
        let formatter = CodeBlockFormatter::new().expect("formatter");
        let (out, count) = formatter.format("<p>Run:</p><pre>sudo make install</pre>");
        assert_eq!(count, 1);
        assert_eq!(
            out,
            "<p>Run:</p><div class=\"code-wrapper\"><pre><code class=\"language-bash\">sudo make install</code></pre></div>"
        );
        assert_eq!(formatter.format(&out).0, out);
    }
}
