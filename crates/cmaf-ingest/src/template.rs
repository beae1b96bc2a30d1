//! DASH segment template expansion.
//!
//! Supports `$RepresentationID$`, `$Bandwidth$`, `$Number$`, `$Time$` and the
//! `$$` escape, with an optional `%0<width>d` format tag on numeric
//! identifiers (e.g. `$Number%05d$`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateValueKind {
    Number,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateMatch {
    pub kind: TemplateValueKind,
    pub value: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    /// `$$`
    Dollar,
    Identifier { name: &'a str, width: Option<usize> },
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        if start > 0 {
            tokens.push(Token::Literal(&rest[..start]));
        }
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            // Unterminated identifier, keep it verbatim
            tokens.push(Token::Literal(&rest[start..]));
            return tokens;
        };
        let inner = &after[..end];
        if inner.is_empty() {
            tokens.push(Token::Dollar);
        } else {
            let (name, width) = match inner.find('%') {
                Some(pos) => (&inner[..pos], parse_width(&inner[pos..])),
                None => (inner, None),
            };
            tokens.push(Token::Identifier { name, width });
        }
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    tokens
}

/// Parse a `%0<width>d` format tag.
fn parse_width(tag: &str) -> Option<usize> {
    let digits = tag.strip_prefix('%')?.strip_suffix('d')?;
    digits.trim_start_matches('0').parse().ok().or(Some(0))
}

fn format_value(value: u64, width: Option<usize>) -> String {
    match width {
        Some(w) => format!("{value:0w$}"),
        None => value.to_string(),
    }
}

fn push_identifier(out: &mut String, name: &str, width: Option<usize>) {
    out.push('$');
    out.push_str(name);
    if let Some(w) = width {
        out.push_str(&format!("%0{w}d"));
    }
    out.push('$');
}

/// Substitute the per-representation identifiers, keeping `$Number$`,
/// `$Time$` and `$$` for later expansion.
pub fn replace_identifiers(template: &str, rep_id: &str, bandwidth: u64) -> String {
    let mut out = String::with_capacity(template.len() + rep_id.len());
    for token in tokenize(template) {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Dollar => out.push_str("$$"),
            Token::Identifier {
                name: "RepresentationID",
                ..
            } => out.push_str(rep_id),
            Token::Identifier {
                name: "Bandwidth",
                width,
            } => out.push_str(&format_value(bandwidth, width)),
            Token::Identifier { name, width } => push_identifier(&mut out, name, width),
        }
    }
    out
}

/// Fill `$Number$` or `$Time$` with `value`.
pub fn replace_time_or_nr(template: &str, value: u64) -> String {
    let mut out = String::with_capacity(template.len() + 20);
    for token in tokenize(template) {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Dollar => out.push('$'),
            Token::Identifier {
                name: "Number" | "Time",
                width,
            } => out.push_str(&format_value(value, width)),
            Token::Identifier { name, width } => push_identifier(&mut out, name, width),
        }
    }
    out
}

/// Recover the `$Number$`/`$Time$` value from a file name produced by
/// `template`. Identifiers other than number/time must already be replaced.
pub fn match_template(template: &str, name: &str) -> Option<TemplateMatch> {
    let tokens = tokenize(template);
    let mut found = None;
    let mut prefix = String::new();
    let mut suffix = String::new();

    for token in &tokens {
        let target = if found.is_some() {
            &mut suffix
        } else {
            &mut prefix
        };
        match token {
            Token::Literal(s) => target.push_str(s),
            Token::Dollar => target.push('$'),
            Token::Identifier { name: "Number", .. } if found.is_none() => {
                found = Some(TemplateValueKind::Number)
            }
            Token::Identifier { name: "Time", .. } if found.is_none() => {
                found = Some(TemplateValueKind::Time)
            }
            Token::Identifier { .. } => return None,
        }
    }

    let kind = found?;
    let digits = name.strip_prefix(prefix.as_str())?.strip_suffix(suffix.as_str())?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = digits.parse().ok()?;
    Some(TemplateMatch { kind, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_identifiers_keeps_number() {
        assert_eq!(
            replace_identifiers("$RepresentationID$/$Number$.m4s", "video_1", 0),
            "video_1/$Number$.m4s"
        );
        assert_eq!(
            replace_identifiers("$RepresentationID$/init.mp4", "audio", 0),
            "audio/init.mp4"
        );
        assert_eq!(
            replace_identifiers("b$Bandwidth%08d$/t$Time$.m4s", "v", 300000),
            "b00300000/t$Time$.m4s"
        );
        assert_eq!(
            replace_identifiers("$RepresentationID$/$Number%05d$.m4s", "v", 0),
            "v/$Number%05d$.m4s"
        );
    }

    #[test]
    fn test_replace_time_or_nr() {
        assert_eq!(replace_time_or_nr("v-$Number$.m4s", 7), "v-7.m4s");
        assert_eq!(replace_time_or_nr("v/$Number%05d$.m4s", 42), "v/00042.m4s");
        assert_eq!(replace_time_or_nr("a/$Time$.m4s", 96000), "a/96000.m4s");
        assert_eq!(replace_time_or_nr("cost$$/$Number$", 3), "cost$/3");
    }

    #[test]
    fn test_unterminated_identifier_is_literal() {
        assert_eq!(replace_time_or_nr("v/$Number.m4s", 1), "v/$Number.m4s");
    }

    #[test]
    fn test_match_template() {
        assert_eq!(
            match_template("video/$Number$.m4s", "video/12.m4s"),
            Some(TemplateMatch {
                kind: TemplateValueKind::Number,
                value: 12
            })
        );
        assert_eq!(
            match_template("a/$Time$.m4s", "a/96000.m4s"),
            Some(TemplateMatch {
                kind: TemplateValueKind::Time,
                value: 96000
            })
        );
        assert_eq!(
            match_template("v/$Number%05d$.m4s", "v/00042.m4s").map(|m| m.value),
            Some(42)
        );
        assert!(match_template("video/$Number$.m4s", "audio/12.m4s").is_none());
        assert!(match_template("video/$Number$.m4s", "video/x12.m4s").is_none());
        assert!(match_template("video/init.mp4", "video/init.mp4").is_none());
    }
}
