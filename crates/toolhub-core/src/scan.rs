//! Best-effort source scanning for frontend artifacts: dependency
//! detection, component export detection and a structural bracket check.
//!
//! None of this is a parser. Results are informational except for
//! [`check_brackets`], which catches truncated or obviously broken scripts.

use std::sync::LazyLock;

use regex::Regex;

static IMPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[\w$*{}\s,]+?\s+from\s+)?["']([^"']+)["']"#)
        .expect("static regex")
});
static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["']([^"']+)["']\s*\)"#).expect("static regex")
});
static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).expect("static regex")
});
static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("static regex")
});
static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("static regex")
});

static EXPORT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\bexport\s+default\b").expect("static regex"));
static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bexport\s+(?:async\s+)?(?:function\*?|const|let|var|class)\s+([A-Za-z_$][\w$]*)")
        .expect("static regex")
});
static EXPORT_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\bexport\s*\{([^}]*)\}").expect("static regex"));

static ELEMENT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z!][^>]*>").expect("static regex"));
static SCRIPT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b").expect("static regex"));
static SCRIPT_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</script\s*>").expect("static regex"));

/// Modules a script pulls in via `import`, dynamic `import()` or `require()`.
pub fn script_dependencies(source: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for re in [&*IMPORT_FROM, &*DYNAMIC_IMPORT, &*REQUIRE] {
        for caps in re.captures_iter(source) {
            push_unique(&mut deps, &caps[1]);
        }
    }
    deps
}

/// External scripts and stylesheets referenced by a markup document, plus
/// whatever its inline scripts import.
pub fn markup_dependencies(document: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for re in [&*SCRIPT_SRC, &*LINK_HREF] {
        for caps in re.captures_iter(document) {
            push_unique(&mut deps, &caps[1]);
        }
    }
    for dep in script_dependencies(document) {
        push_unique(&mut deps, &dep);
    }
    deps
}

/// Names exported by an ES module, in order of appearance. A default export
/// is reported as `default`.
pub fn exported_names(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    if let Some(m) = EXPORT_DEFAULT.find(source) {
        found.push((m.start(), "default".into()));
    }
    for caps in EXPORT_DECL.captures_iter(source) {
        let start = caps.get(0).map_or(0, |m| m.start());
        found.push((start, caps[1].to_string()));
    }
    for caps in EXPORT_LIST.captures_iter(source) {
        let start = caps.get(0).map_or(0, |m| m.start());
        for item in caps[1].split(',') {
            let name = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item.trim(),
            };
            if !name.is_empty() {
                found.push((start, name.to_string()));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut names = Vec::new();
    for (_, name) in found {
        push_unique(&mut names, &name);
    }
    names
}

/// First entry of `recognized` that the module actually exports.
///
/// The order of `recognized` is the priority order, so the choice is stable
/// no matter how the module orders its exports.
pub fn choose_export<'a>(exports: &[String], recognized: &'a [String]) -> Option<&'a str> {
    recognized
        .iter()
        .find(|name| exports.iter().any(|e| e == *name))
        .map(String::as_str)
}

pub fn has_element_tag(document: &str) -> bool {
    ELEMENT_TAG.is_match(document)
}

/// Number of `<script` openings and `</script>` closings.
pub fn script_tag_balance(document: &str) -> (usize, usize) {
    (
        SCRIPT_OPEN.find_iter(document).count(),
        SCRIPT_CLOSE.find_iter(document).count(),
    )
}

/// Keywords after which a `/` starts a regular expression, not a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Check that `()`, `[]` and `{}` balance outside of strings, template
/// literals, regular expression literals and comments.
pub fn check_brackets(source: &str) -> Result<(), String> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;
    // Whether a `/` here would start a regex literal rather than divide.
    let mut regex_allowed = true;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                let opened = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated comment opened on line {opened}")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '/' if regex_allowed => {
                i = skip_regex(&chars, i, line)?;
                regex_allowed = false;
            }
            '"' | '\'' | '`' => {
                let opened = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(format!("unterminated string opened on line {opened}"));
                        }
                        Some('\\') => i += 1,
                        Some(&q) if q == c => break,
                        Some('\n') if c != '`' => {
                            return Err(format!("unterminated string on line {opened}"));
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
                regex_allowed = false;
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let begin = i;
                while chars
                    .get(i)
                    .is_some_and(|&w| w.is_alphanumeric() || w == '_' || w == '$')
                {
                    i += 1;
                }
                let word: String = chars[begin..i].iter().collect();
                regex_allowed = REGEX_PREFIX_KEYWORDS.contains(&word.as_str());
                continue;
            }
            '(' | '[' | '{' => {
                stack.push((c, line));
                regex_allowed = true;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, opened)) => {
                        return Err(format!(
                            "`{c}` on line {line} does not close `{open}` from line {opened}"
                        ));
                    }
                    None => return Err(format!("unexpected `{c}` on line {line}")),
                }
                // A block can be followed by a statement starting with a regex.
                regex_allowed = c == '}';
            }
            // `<` is left out so markup-like text in scripts is not read as a regex.
            '.' | '<' => regex_allowed = false,
            _ => regex_allowed = true,
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, opened)) => Err(format!("`{open}` opened on line {opened} is never closed")),
        None => Ok(()),
    }
}

/// Skip a regex literal starting at the `/` at `start`. Returns the index of
/// the closing `/`.
fn skip_regex(chars: &[char], start: usize, line: usize) -> Result<usize, String> {
    let mut i = start + 1;
    let mut in_class = false;
    loop {
        match chars.get(i) {
            None | Some('\n') => return Err(format!("unterminated regular expression on line {line}")),
            Some('\\') => i += 1,
            Some('[') => in_class = true,
            Some(']') => in_class = false,
            Some('/') if !in_class => return Ok(i),
            Some(_) => {}
        }
        i += 1;
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
