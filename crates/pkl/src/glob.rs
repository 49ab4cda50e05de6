use regex::Regex;

use crate::error::{EvalError, EvalResult};

/// Compiles a shell-style glob pattern into an anchored regex.
///
/// Supported grammar: `*` (any run of non-separator code points), `**`
/// (any run including separators), `?` (one non-separator code point),
/// `[...]` character classes (leading `!` negates, `-` is a range;
/// classes never match a path separator), `{a,b,c}` non-nested
/// alternation, and `\` escaping the next metacharacter. Extended-glob
/// forms (`!(…)`, `+(…)`, `?(…)`, `@(…)`, `*(…)`) are rejected.
pub fn glob_to_regex(pattern: &str) -> EvalResult<Regex> {
    let translated = translate(pattern)?;
    Regex::new(&format!("^{translated}$"))
        .map_err(|e| EvalError::resolve(format!("Invalid glob pattern `{pattern}`: {e}.")))
}

pub(crate) fn translate(pattern: &str) -> EvalResult<String> {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'(') {
                    return Err(invalid(pattern, "extended glob `*(` is not supported"));
                }
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => {
                if chars.peek() == Some(&'(') {
                    return Err(invalid(pattern, "extended glob `?(` is not supported"));
                }
                out.push_str("[^/]");
            }
            '[' => {
                out.push('[');
                let mut first = true;
                let mut negated = false;
                let mut closed = false;
                while let Some(cc) = chars.next() {
                    match cc {
                        '!' if first => {
                            out.push('^');
                            negated = true;
                        }
                        ']' if !first || negated => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars
                                .next()
                                .ok_or_else(|| invalid(pattern, "trailing backslash"))?;
                            push_class_char(&mut out, escaped);
                        }
                        '-' => out.push('-'),
                        other => push_class_char(&mut out, other),
                    }
                    if cc != '!' {
                        first = false;
                    }
                }
                if !closed {
                    return Err(invalid(pattern, "unterminated character class"));
                }
                // Classes never cross a path separator.
                if negated {
                    out.push('/');
                }
                out.push(']');
            }
            '{' => {
                let mut parts: Vec<String> = vec![String::new()];
                let mut closed = false;
                while let Some(cc) = chars.next() {
                    match cc {
                        '{' => return Err(invalid(pattern, "nested alternation is not supported")),
                        '}' => {
                            closed = true;
                            break;
                        }
                        ',' => parts.push(String::new()),
                        '\\' => {
                            let escaped = chars
                                .next()
                                .ok_or_else(|| invalid(pattern, "trailing backslash"))?;
                            parts.last_mut().expect("parts is non-empty").push('\\');
                            parts.last_mut().expect("parts is non-empty").push(escaped);
                        }
                        other => parts.last_mut().expect("parts is non-empty").push(other),
                    }
                }
                if !closed {
                    return Err(invalid(pattern, "unterminated alternation"));
                }
                let translated: EvalResult<Vec<String>> = parts.iter().map(|p| translate(p)).collect();
                out.push_str("(?:");
                out.push_str(&translated?.join("|"));
                out.push(')');
            }
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| invalid(pattern, "trailing backslash"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '!' | '+' | '@' if chars.peek() == Some(&'(') => {
                return Err(invalid(pattern, format!("extended glob `{c}(` is not supported")));
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    Ok(out)
}

fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '^' | '[' | '&' | '~') {
        out.push('\\');
    }
    out.push(c);
}

fn invalid(pattern: &str, reason: impl std::fmt::Display) -> Box<EvalError> {
    EvalError::resolve(format!("Invalid glob pattern `{pattern}`: {reason}."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, text: &str) -> bool {
        glob_to_regex(pattern).unwrap().is_match(text)
    }

    #[test]
    fn star_does_not_cross_separators() {
        assert!(matches("*.pkl", "bar.pkl"));
        assert!(!matches("*.pkl", "foo/bar.pkl"));
    }

    #[test]
    fn double_star_crosses_separators() {
        assert!(matches("**/*.pkl", "foo/bar.pkl"));
        assert!(matches("**/*.pkl", "a/b/c.pkl"));
        assert!(!matches("**/*.pkl", "c.toml"));
    }

    #[test]
    fn question_mark_matches_one_code_point() {
        assert!(matches("fil?.pkl", "file.pkl"));
        assert!(!matches("fil?.pkl", "fil/.pkl"));
        assert!(!matches("fil?.pkl", "filee.pkl"));
    }

    #[test]
    fn character_classes() {
        assert!(matches("file[12].pkl", "file1.pkl"));
        assert!(matches("file[a-c].pkl", "fileb.pkl"));
        assert!(!matches("file[!a-c].pkl", "fileb.pkl"));
        assert!(matches("file[!a-c].pkl", "filed.pkl"));
        // A negated class still never matches the separator.
        assert!(!matches("a[!b]c", "a/c"));
    }

    #[test]
    fn alternation() {
        assert!(matches("{a,b}*.pkl", "a1.pkl"));
        assert!(matches("{a,b}*.pkl", "b.pkl"));
        assert!(!matches("{a,b}*.pkl", "c.pkl"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(matches(r"a\*b", "a*b"));
        assert!(!matches(r"a\*b", "axb"));
    }

    #[test]
    fn extended_glob_forms_are_rejected() {
        for pattern in ["!(a)", "+(a)", "?(a)", "@(a)", "*(a)"] {
            let err = glob_to_regex(pattern).unwrap_err();
            assert!(err.message().contains("extended glob"), "{pattern}");
        }
    }

    #[test]
    fn unterminated_forms_are_rejected() {
        assert!(glob_to_regex("[abc").is_err());
        assert!(glob_to_regex("{a,b").is_err());
        assert!(glob_to_regex("a{b,{c,d}}").is_err());
    }
}
