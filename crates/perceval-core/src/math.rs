//! LaTeX answer normalisation and numeric/symbolic equivalence.
//!
//! Answers are first canonicalised as strings (formatting macros, units,
//! whitespace and thousands separators removed). Two canonical answers are
//! then compared as expressions: the LaTeX is rewritten into plain infix
//! syntax, parsed with `meval` and evaluated at fixed sample points for every
//! free variable, so equivalent fractions and algebraically equal forms
//! compare equal. Anything that cannot be rewritten or parsed falls back to
//! string comparison in the grader.

use meval::{Context, Expr};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

const REL_TOLERANCE: f64 = 1e-6;
const SAMPLE_BASES: [f64; 3] = [0.7, 1.9, 3.3];
/// Longest canonical answer handed to the expression parser.
const MAX_EXPRESSION_LEN: usize = 512;
/// Deepest bracket or macro-argument nesting accepted.
const MAX_NESTING: usize = 64;

static TRAILING_UNITS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?\S)\s*\\(?:text|mbox|mathrm)\{\s+[^{}]*\}$").expect("valid regex")
});
static TEXT_MACRO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:text|textbf|textnormal|mathrm|mathbf|mbox|operatorname)\{([^{}]*)\}")
        .expect("valid regex")
});
static SQRT_SHORTHAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\sqrt([0-9a-zA-Z])").expect("valid regex"));
static THOUSANDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid regex"));
static SHORT_LHS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]{1,2}$").expect("valid regex"));

const STRIPPED: &[&str] = &[
    "\\left", "\\right", "\\displaystyle", "\\!", "\\,", "\\;", "\\:", "\\ ", "^{\\circ}",
    "^\\circ", "\\$", "$", "\\%", "%",
];

/// Canonical string form of an answer.
pub fn normalize_answer(answer: &str) -> String {
    let mut s = answer.trim().to_string();

    if let Some(caps) = TRAILING_UNITS_RE.captures(&s) {
        s = caps[1].to_string();
    }
    s = TEXT_MACRO_RE.replace_all(&s, "$1").into_owned();
    s = s.replace("\\dfrac", "\\frac").replace("\\tfrac", "\\frac");
    for pat in STRIPPED {
        s = s.replace(pat, "");
    }
    s.retain(|c| !c.is_whitespace());

    while s.ends_with('.') {
        s.pop();
    }

    if let Some((lhs, rhs)) = s.split_once('=') {
        if !rhs.contains('=') && SHORT_LHS_RE.is_match(lhs) {
            s = rhs.to_string();
        }
    }

    s = SQRT_SHORTHAND_RE.replace_all(&s, "\\sqrt{$1}").into_owned();
    s = fix_fracs(&s);

    if THOUSANDS_RE.is_match(&s) {
        s.retain(|c| c != ',');
    }
    if s.starts_with('.') {
        s.insert(0, '0');
    } else if s.starts_with("-.") {
        s.insert(1, '0');
    }
    s
}

/// Rewrite `\frac12` and `\frac1{2}` shorthand into braced form.
fn fix_fracs(s: &str) -> String {
    const FRAC: &str = "\\frac";
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find(FRAC) {
        out.push_str(&rest[..idx + FRAC.len()]);
        rest = &rest[idx + FRAC.len()..];
        for _ in 0..2 {
            let mut chars = rest.chars();
            match chars.next() {
                Some('{') => {
                    let end = matching_brace(rest).unwrap_or(rest.len());
                    out.push_str(&rest[..end]);
                    rest = &rest[end..];
                }
                Some(c) if c.is_ascii_alphanumeric() => {
                    out.push('{');
                    out.push(c);
                    out.push('}');
                    rest = chars.as_str();
                }
                _ => break,
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte offset just past the brace group that opens at the start of `s`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Compare two canonical answers as expressions.
///
/// `None` means at least one side could not be parsed and the caller should
/// fall back to string comparison.
pub fn expressions_equivalent(a: &str, b: &str) -> Option<bool> {
    let parts_a = split_top_level(a);
    let parts_b = split_top_level(b);
    if parts_a.len() > 1 || parts_b.len() > 1 {
        if parts_a.len() != parts_b.len() || outer_delimiters(a) != outer_delimiters(b) {
            return Some(false);
        }
        if is_set(a) {
            return Some(same_multiset(&parts_a, &parts_b));
        }
        let mut all = true;
        for (x, y) in parts_a.iter().zip(&parts_b) {
            all &= scalar_equivalent(x, y)?;
        }
        return Some(all);
    }
    scalar_equivalent(a, b)
}

/// Order-insensitive comparison of set elements.
fn same_multiset(a: &[String], b: &[String]) -> bool {
    let mut unmatched: Vec<&String> = b.iter().collect();
    a.iter().all(|x| {
        let found = unmatched
            .iter()
            .position(|y| x == *y || scalar_equivalent(x, y).unwrap_or(false));
        match found {
            Some(idx) => {
                unmatched.swap_remove(idx);
                true
            }
            None => false,
        }
    })
}

fn scalar_equivalent(a: &str, b: &str) -> Option<bool> {
    let mut vars = BTreeSet::new();
    let ea = parse_expression(a, &mut vars)?;
    let eb = parse_expression(b, &mut vars)?;
    let vars: Vec<char> = vars.into_iter().collect();

    let mut checked = 0;
    for base in SAMPLE_BASES {
        let (Some(va), Some(vb)) = (evaluate(&ea, &vars, base), evaluate(&eb, &vars, base))
        else {
            continue;
        };
        if !va.is_finite() || !vb.is_finite() {
            continue;
        }
        if !approx_eq(va, vb) {
            return Some(false);
        }
        checked += 1;
        if vars.is_empty() {
            break;
        }
    }
    (checked > 0).then_some(true)
}

/// Evaluate with the `j`-th variable bound to `base + 0.37 * j`.
fn evaluate(expr: &Expr, vars: &[char], base: f64) -> Option<f64> {
    let mut ctx = Context::new();
    ctx.func("log", f64::log10);
    for (j, v) in vars.iter().enumerate() {
        ctx.var(v.to_string(), base + 0.37 * j as f64);
    }
    expr.eval_with_context(ctx).ok()
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= REL_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn is_set(s: &str) -> bool {
    s.starts_with("\\{") && s.ends_with("\\}")
}

fn outer_delimiters(s: &str) -> (Option<char>, Option<char>) {
    if is_set(s) {
        return (Some('{'), Some('}'));
    }
    let first = s.chars().next().filter(|c| matches!(c, '(' | '['));
    let last = s.chars().last().filter(|c| matches!(c, ')' | ']'));
    (first, last)
}

/// Split a tuple/interval/set on commas that are not nested in any bracket.
fn split_top_level(s: &str) -> Vec<String> {
    let inner = strip_outer(s);
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

fn strip_outer(s: &str) -> &str {
    let s = s
        .strip_prefix("\\{")
        .and_then(|t| t.strip_suffix("\\}"))
        .unwrap_or(s);
    let opens = s.starts_with('(') || s.starts_with('[');
    let closes = s.ends_with(')') || s.ends_with(']');
    if opens && closes && s.len() >= 2 {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

// ============================================================================
// LATEX TO INFIX
// ============================================================================

/// Parse a canonical answer, recording its single-letter variables.
fn parse_expression(s: &str, vars: &mut BTreeSet<char>) -> Option<Expr> {
    if s.is_empty() || s.len() > MAX_EXPRESSION_LEN {
        return None;
    }
    let infix = to_infix(s, 0, vars)?;
    infix.parse::<Expr>().ok()
}

/// Rewrite canonical LaTeX into `meval` syntax: braces become parentheses,
/// `\frac`, `\sqrt` and named functions become calls or quotients, and
/// juxtaposition becomes an explicit `*`.
///
/// Multi-letter words and unknown macros are rejected, as is nesting deeper
/// than [`MAX_NESTING`].
fn to_infix(s: &str, depth: usize, vars: &mut BTreeSet<char>) -> Option<String> {
    if depth > MAX_NESTING {
        return None;
    }
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut open = 0usize;
    let mut after_operand = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text.parse().ok()?;
                push_operand(&mut out, &mut after_operand, &value.to_string());
                continue;
            }
            'a'..='z' | 'A'..='Z' => {
                if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic()) {
                    return None;
                }
                vars.insert(c);
                push_operand(&mut out, &mut after_operand, &c.to_string());
            }
            '+' | '-' | '*' | '/' | '^' => {
                out.push(c);
                after_operand = false;
            }
            '(' | '{' | '[' => {
                open += 1;
                if depth + open > MAX_NESTING {
                    return None;
                }
                if after_operand {
                    out.push('*');
                }
                out.push('(');
                after_operand = false;
            }
            ')' | '}' | ']' => {
                open = open.checked_sub(1)?;
                out.push(')');
                after_operand = true;
            }
            '\\' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_alphabetic() {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                i = end;
                let inner = depth + open + 1;
                match name.as_str() {
                    "cdot" | "times" => {
                        out.push('*');
                        after_operand = false;
                    }
                    "div" => {
                        out.push('/');
                        after_operand = false;
                    }
                    "pi" => push_operand(&mut out, &mut after_operand, "pi"),
                    "frac" => {
                        let (num, next) = take_group(&chars, i, '{', '}')?;
                        let (den, next) = take_group(&chars, next, '{', '}')?;
                        i = next;
                        let num = to_infix(&num, inner, vars)?;
                        let den = to_infix(&den, inner, vars)?;
                        push_operand(&mut out, &mut after_operand, &format!("(({num})/({den}))"));
                    }
                    "sqrt" => {
                        let degree = if chars.get(i) == Some(&'[') {
                            let (degree, next) = take_group(&chars, i, '[', ']')?;
                            i = next;
                            Some(to_infix(&degree, inner, vars)?)
                        } else {
                            None
                        };
                        let (radicand, next) = take_group(&chars, i, '{', '}')?;
                        i = next;
                        let radicand = to_infix(&radicand, inner, vars)?;
                        let text = match degree {
                            Some(d) => format!("(({radicand})^(1/({d})))"),
                            None => format!("sqrt({radicand})"),
                        };
                        push_operand(&mut out, &mut after_operand, &text);
                    }
                    "sin" | "cos" | "tan" | "ln" | "log" | "exp" => {
                        let (arg, next) = function_argument(&chars, i)?;
                        i = next;
                        let arg = to_infix(&arg, inner, vars)?;
                        push_operand(&mut out, &mut after_operand, &format!("{name}({arg})"));
                    }
                    _ => return None,
                }
                continue;
            }
            _ => return None,
        }
        i += 1;
    }
    (open == 0).then_some(out)
}

fn push_operand(out: &mut String, after_operand: &mut bool, text: &str) {
    if *after_operand {
        out.push('*');
    }
    out.push_str(text);
    *after_operand = true;
}

/// Contents of the group opening at `start` and the index just past it.
fn take_group(chars: &[char], start: usize, open: char, close: char) -> Option<(String, usize)> {
    if chars.get(start) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    for (offset, &c) in chars[start..].iter().enumerate() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let end = start + offset;
                return Some((chars[start + 1..end].iter().collect(), end + 1));
            }
        }
    }
    None
}

/// `\sin{x}`, `\sin(x)`, `\sin x` and `\sin 2` all take one argument.
fn function_argument(chars: &[char], start: usize) -> Option<(String, usize)> {
    match *chars.get(start)? {
        '{' => take_group(chars, start, '{', '}'),
        '(' => take_group(chars, start, '(', ')'),
        c if c.is_ascii_alphabetic() => Some((c.to_string(), start + 1)),
        c if c.is_ascii_digit() => {
            let len = chars[start..]
                .iter()
                .take_while(|c| c.is_ascii_digit() || **c == '.')
                .count();
            Some((chars[start..start + len].iter().collect(), start + len))
        }
        _ => None,
    }
}
