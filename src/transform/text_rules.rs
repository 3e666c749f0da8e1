use anyhow::Result;
use regex::{Captures, Regex};
use tracing::debug;

use crate::util::compile;

const DIVIDER: &str = "<hr class=\"enrichment-divider\">";

/// Per-chapter values a rule may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEnv {
    pub chapter: u32,
}

pub enum Rewrite {
    Template(&'static str),
    With(fn(&Captures<'_>, &RuleEnv) -> String),
}

/// One named regex rewrite.
pub struct TextRule {
    pub name: &'static str,
    pattern: Regex,
    rewrite: Rewrite,
    outside_code: bool,
}

impl TextRule {
    fn template(name: &'static str, pattern: &str, template: &'static str) -> Result<Self> {
        Ok(Self {
            name,
            pattern: compile(pattern, name)?,
            rewrite: Rewrite::Template(template),
            outside_code: false,
        })
    }

    fn with(
        name: &'static str,
        pattern: &str,
        rewrite: fn(&Captures<'_>, &RuleEnv) -> String,
    ) -> Result<Self> {
        Ok(Self {
            name,
            pattern: compile(pattern, name)?,
            rewrite: Rewrite::With(rewrite),
            outside_code: false,
        })
    }

    /// Leaves `<pre>` blocks untouched.
    fn outside_code(mut self) -> Self {
        self.outside_code = true;
        self
    }

    pub fn apply(&self, text: &str, env: &RuleEnv) -> (String, usize) {
        let hits = self.pattern.find_iter(text).count();
        if hits == 0 {
            return (text.to_string(), 0);
        }
        let out = match &self.rewrite {
            Rewrite::Template(template) => self.pattern.replace_all(text, *template),
            Rewrite::With(rewrite) => self
                .pattern
                .replace_all(text, |caps: &Captures<'_>| rewrite(caps, env)),
        };
        (out.into_owned(), hits)
    }
}

/// An ordered list of rules applied one after another.
pub struct RuleSet {
    pub name: &'static str,
    rules: Vec<TextRule>,
    code_block: Regex,
}

impl RuleSet {
    fn new(name: &'static str, rules: Vec<TextRule>) -> Result<Self> {
        Ok(Self {
            name,
            rules,
            code_block: compile(r"(?is)<pre\b.*?</pre>", "code block span")?,
        })
    }

    /// LaTeX hygiene that must happen while math is still raw, plus markup
    /// fixes that heading ids depend on.
    pub fn pre_protect() -> Result<Self> {
        Self::new(
            "pre-protect",
            vec![
                TextRule::template(
                    "text-command-spacing",
                    r"\\(textsc|texttt|textrm|mbox)\s+\{",
                    r"\${1}{",
                )?,
                TextRule::template("boldsymbolod", r"\\boldsymbolod\b", r"\bmod")?,
                TextRule::template("hdots", r"\\hdots\b", r"\cdots")?,
                TextRule::template(
                    "rotated-subset",
                    r"\\rotatebox\s*\[[^\]]*\]\s*\{[^}]*\}\s*\{\s*\$?\\subset\$?\s*\}",
                    r"\subset",
                )?,
                TextRule::with(
                    "text-command-underscores",
                    r"\\(mbox|text|texttt|textrm|textsc|textsf|mathrm)\{([^}]+)\}",
                    |caps, _| format!("\\{}{{{}}}", &caps[1], caps[2].replace(r"\_", "_")),
                )?,
                TextRule::template("crosslinks", r#"(?s)<div class="crosslinks">.*?</div>"#, "")?,
                TextRule::template(
                    "chapter-titlemark",
                    r#"(?is)(<h2[^>]*class="[^"]*chapterHead[^"]*"[^>]*>(?:\s|<a[^>]*>\s*</a>)*)<span[^>]*class="[^"]*titlemark[^"]*"[^>]*>Chapter[^<]*</span>\s*(?:<br\s*/?>)?"#,
                    "${1}",
                )?,
            ],
        )
    }

    /// Markup cleanup while math is protected.
    pub fn body() -> Result<Self> {
        Self::new(
            "body",
            vec![
                TextRule::with("ligatures", "[\u{fb00}-\u{fb04}]", |caps, _| {
                    match &caps[0] {
                        "\u{fb00}" => "ff",
                        "\u{fb01}" => "fi",
                        "\u{fb02}" => "fl",
                        "\u{fb03}" => "ffi",
                        _ => "ffl",
                    }
                    .to_string()
                })?,
                TextRule::with("stray-escapes", r"\\+[_()\[\]]", |caps, _| {
                    let found = &caps[0];
                    if found.len() == 2 {
                        found[1..].to_string()
                    } else {
                        found.to_string()
                    }
                })?
                .outside_code(),
                TextRule::template(
                    "vrule-spans",
                    r#"(?s)<span[^>]*class="[^"]*vrule[^"]*"[^>]*>.*?</span>"#,
                    "",
                )?,
                TextRule::template(
                    "vrule-divs",
                    r#"(?s)<div[^>]*class="[^"]*vrule[^"]*"[^>]*>.*?</div>"#,
                    "",
                )?,
                TextRule::template("vrule-rules", r#"<hr[^>]*class="[^"]*vrule[^"]*"[^>]*>"#, "")?,
                TextRule::template(
                    "underscore-paragraphs",
                    r"(?s)<p[^>]*>\s*(?:_{6,}\s*)+</p>",
                    DIVIDER,
                )?,
                TextRule::template("dash-paragraphs", r"(?s)<p[^>]*>\s*(?:-{6,}\s*)+</p>", DIVIDER)?,
                TextRule::template(
                    "trailing-underscores",
                    r"([^_\n])[ \t]*\n\s*(?:_{10,}\s*)+</p>",
                    "${1}</p>\n<hr class=\"enrichment-divider\">",
                )?,
                TextRule::template(
                    "standalone-rules",
                    r"(>)\s*(?:_{6,}|-{6,})\s*(<[^!])",
                    "${1}<hr class=\"enrichment-divider\">${2}",
                )?
                .outside_code(),
                TextRule::template(
                    "duplicate-dividers",
                    r#"(<hr class="enrichment-divider"\s*/?>)(?:\s*<hr class="enrichment-divider"\s*/?>)+"#,
                    "${1}",
                )?,
                TextRule::with("inline-code-underscores", r"(?s)<code([^>]*)>(.*?)</code>", |caps, _| {
                    if caps[1].contains("language-") {
                        caps[0].to_string()
                    } else {
                        format!("<code{}>{}</code>", &caps[1], caps[2].replace(r"\_", "_"))
                    }
                })?,
                TextRule::with("teletype", r"(?is)<tt([^>]*)>(.*?)</tt>", |caps, _| {
                    format!("<code{}>{}</code>", &caps[1], caps[2].replace(r"\_", "_"))
                })?,
                TextRule::template("fig-label-unwrap", r#"<span class="fig-label">([^<]*)</span>"#, "${1}")?,
                TextRule::with(
                    "fig-label",
                    r#"(?is)(<(?:figcaption\b[^>]*|(?:p|div)\b[^>]*class="[^"]*caption[^"]*"[^>]*)>(?:[^<]|<(?:span|a)\b[^>]*>|</span>|</a>)*?)((?:Figure|Fig\.|Table|Algorithm|Definition|Listing)\s*)(\d+)((?:\.\d+)*)([\s:]+)"#,
                    |caps, env| {
                        format!(
                            "{}<span class=\"fig-label\">{}{}{}{}</span>",
                            &caps[1],
                            &caps[2],
                            chapter_relative(&caps[3], env),
                            &caps[4],
                            &caps[5]
                        )
                    },
                )?,
                TextRule::with(
                    "figure-anchor-numbers",
                    r"(?i)(Figure\s+|Fig\.\s*)(<a[^>]*>)1(\.\d+)((?:<!--[^>]*-->)?</a>)",
                    |caps, env| {
                        format!(
                            "{}{}{}{}{}",
                            &caps[1],
                            &caps[2],
                            chapter_relative("1", env),
                            &caps[3],
                            &caps[4]
                        )
                    },
                )?,
                TextRule::with(
                    "equation-anchor-numbers",
                    r"(?i)(Equation\s+|Eq\.\s+)(<a[^>]*>)1((?:\.\d+)?)((?:<!--[^>]*-->)?</a>)",
                    |caps, env| {
                        format!(
                            "{}{}{}{}{}",
                            &caps[1],
                            &caps[2],
                            chapter_relative("1", env),
                            &caps[3],
                            &caps[4]
                        )
                    },
                )?,
            ],
        )
    }

    /// Artifacts in restored math and the text around it.
    pub fn post_restore() -> Result<Self> {
        Self::new(
            "post-restore",
            vec![
                TextRule::template("bold-math", r"\\bm\b", r"\boldsymbol")?,
                TextRule::with("text-mode-hash", r"\\(mbox|text)(\s*)\{([^}]*)\}", |caps, _| {
                    format!("\\{}{}{{{}}}", &caps[1], &caps[2], caps[3].replace(r"\#", "#"))
                })?,
                TextRule::template(
                    "checkmark-in-math",
                    r#"(?i)\\[(\[]\s*(?:\\|&#x5C;|&#92;)mathchar\s*"?\s*458\s*\\[)\]]"#,
                    "<span class=\"checkmark\">\u{2713}</span>",
                )?,
                TextRule::template(
                    "checkmark",
                    r#"(?i)(?:\\|&#x5C;|&#92;)mathchar\s*"?\s*458"#,
                    "<span class=\"checkmark\">\u{2713}</span>",
                )?,
                TextRule::template(
                    "mathchar",
                    r#"(?i)(?:\\|&#x5C;|&#92;)mathchar\s*['"]?\s*[0-9a-f]+"#,
                    "",
                )?,
                TextRule::template("noindent", r"\\noindent\b", "")?,
                TextRule::template("m-at-th", r"\\m@th", "")?,
                TextRule::template("relax", r"\\relax\b", "")?,
                TextRule::template("hskip", r"\\hskip\s*[\d.]+[a-z]+", "")?,
                TextRule::template("vskip", r"\\vskip\s*-?[\d.]+\s*[a-z]{2}", "")?,
                TextRule::template("underscore-runs", r"_{5,}", "")?.outside_code(),
            ],
        )
    }

    pub fn apply(&self, html: &str, env: &RuleEnv) -> String {
        let mut out = html.to_string();
        for rule in &self.rules {
            let (next, hits) = if rule.outside_code {
                self.apply_outside_code(rule, &out, env)
            } else {
                rule.apply(&out, env)
            };
            if hits > 0 {
                debug!(set = self.name, rule = rule.name, hits, "text rule applied");
            }
            out = next;
        }
        out
    }

    #[cfg(test)]
    pub fn rule(&self, name: &str) -> Option<&TextRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    fn apply_outside_code(&self, rule: &TextRule, html: &str, env: &RuleEnv) -> (String, usize) {
        let mut out = String::with_capacity(html.len());
        let mut hits = 0;
        let mut last = 0;
        for block in self.code_block.find_iter(html) {
            let (text, count) = rule.apply(&html[last..block.start()], env);
            out.push_str(&text);
            out.push_str(block.as_str());
            hits += count;
            last = block.end();
        }
        let (text, count) = rule.apply(&html[last..], env);
        out.push_str(&text);
        (out, hits + count)
    }
}

/// Converter output numbers every chapter's figures and equations from 1.
fn chapter_relative(number: &str, env: &RuleEnv) -> String {
    if number == "1" && env.chapter > 1 {
        env.chapter.to_string()
    } else {
        number.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CH7: RuleEnv = RuleEnv { chapter: 7 };

    fn run(set: &RuleSet, name: &str, input: &str) -> String {
        set.rule(name).expect("rule exists").apply(input, &CH7).0
    }

    #[test]
    fn pre_protect_rules_fix_latex_typos() {
        let set = RuleSet::pre_protect().expect("rules");
        assert_eq!(run(&set, "text-command-spacing", r"\textsc {Adam}"), r"\textsc{Adam}");
        assert_eq!(run(&set, "boldsymbolod", r"a \boldsymbolod b"), r"a \bmod b");
        assert_eq!(run(&set, "hdots", r"x_1, \hdots, x_n"), r"x_1, \cdots, x_n");
        assert_eq!(
            run(&set, "rotated-subset", r"\rotatebox[origin=c]{90}{$\subset$}"),
            r"\subset"
        );
        assert_eq!(
            run(&set, "text-command-underscores", r"\mbox{norm\_const}"),
            r"\mbox{norm_const}"
        );
    }

    #[test]
    fn stray_escapes_are_removed_outside_code_only() {
        let set = RuleSet::body().expect("rules");
        let html = r#"<p>file\_name and \\_ kept</p><pre><code class="language-python">a\_b</code></pre><p>x\(</p>"#;
        assert_eq!(
            set.apply(html, &CH7),
            r#"<p>file_name and \\_ kept</p><pre><code class="language-python">a\_b</code></pre><p>x(</p>"#
        );
    }

    #[test]
    fn rule_lines_collapse_into_one_divider() {
        let set = RuleSet::body().expect("rules");
        let html = "<p>______________</p>\n<p>-------------</p>";
        let out = set.apply(html, &CH7);
        assert_eq!(out, "<hr class=\"enrichment-divider\">");
        assert_eq!(set.apply(&out, &CH7), out);
    }

    #[test]
    fn captions_get_chapter_relative_labels() {
        let set = RuleSet::body().expect("rules");
        let html = "<figcaption class=\"caption\"><span class=\"id\">Figure 1.3: </span>Filters</figcaption>";
        let out = set.apply(html, &CH7);
        assert_eq!(
            out,
            "<figcaption class=\"caption\"><span class=\"id\"><span class=\"fig-label\">Figure 7.3: </span></span>Filters</figcaption>"
        );
        assert_eq!(set.apply(&out, &CH7), out);
    }

    #[test]
    fn anchor_numbers_follow_the_chapter() {
        let set = RuleSet::body().expect("rules");
        assert_eq!(
            run(&set, "figure-anchor-numbers", "Figure <a href=\"#x1-3\">1.4<!-- tex4ht:ref: fig:a --></a>"),
            "Figure <a href=\"#x1-3\">7.4<!-- tex4ht:ref: fig:a --></a>"
        );
        assert_eq!(
            run(&set, "equation-anchor-numbers", "Eq. <a href=\"#x1-9\">1.2</a>"),
            "Eq. <a href=\"#x1-9\">7.2</a>"
        );
        assert_eq!(
            run(&set, "equation-anchor-numbers", "Eq. <a href=\"#x1-9\">11.2</a>"),
            "Eq. <a href=\"#x1-9\">11.2</a>"
        );
    }

    #[test]
    fn teletype_becomes_code_and_ligatures_are_split() {
        let set = RuleSet::body().expect("rules");
        assert_eq!(run(&set, "teletype", r"<tt>model\_dir</tt>"), "<code>model_dir</code>");
        assert_eq!(run(&set, "ligatures", "\u{fb01}nal e\u{fb00}ect"), "final effect");
    }

    #[test]
    fn chapter_titlemark_is_dropped() {
        let set = RuleSet::pre_protect().expect("rules");
        let html = "<h2 class=\"chapterHead\"><span class=\"titlemark\">Chapter 7</span><br><a id=\"x1-1000\"></a>Convolutional Networks</h2>";
        assert_eq!(
            run(&set, "chapter-titlemark", html),
            "<h2 class=\"chapterHead\"><a id=\"x1-1000\"></a>Convolutional Networks</h2>"
        );
    }

    #[test]
    fn post_restore_rules_clean_math_artifacts() {
        let set = RuleSet::post_restore().expect("rules");
        assert_eq!(
            set.apply(r"\(\bm{x} \bmod 2\) \mbox{\#params}", &CH7),
            r"\(\boldsymbol{x} \bmod 2\) \mbox{#params}"
        );
        assert_eq!(
            set.apply("ok \\(\\mathchar\"458\\) \\mathchar\"13A \\noindent", &CH7),
            "ok <span class=\"checkmark\">\u{2713}</span>  "
        );
    }
}
