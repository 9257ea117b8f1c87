//! Text preparation for speech output.
//!
//! Speech engines degrade badly on literal markdown syntax and on unbounded
//! utterances, so message text is sanitized (markup stripped, punctuation
//! spacing normalized) and then split into bounded chunks that prefer
//! sentence and clause boundaries. Chunking also lets playback start before
//! a long message is fully processed.

/// Upper bound for one utterance, in chars.
pub const MAX_CHUNK_LEN: usize = 220;

/// Minimum position for a soft word-boundary cut; below this the chunker
/// cuts mid-word rather than emitting a tiny fragment.
const MIN_SOFT_CUT: usize = 40;

/// Strip markup and normalize whitespace so the result reads naturally when
/// spoken. Idempotent: sanitizing sanitized text is a no-op.
#[must_use]
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let t = strip_code_spans(text);
    let t = rewrite_links(&t);
    let t = strip_decorations(&t);
    let t = space_out_brackets(&t);
    let t = collapse_hyphen_runs(&t);
    let t = space_sentence_punctuation(&t);
    collapse_whitespace(&t)
}

/// Split `text` into utterance-ready chunks of at most `max_len` chars.
///
/// Sentences are kept whole where possible (terminal punctuation stays
/// attached); oversized sentences re-split at `", "` boundaries, and a
/// single oversized comma piece wraps at the last space at or before
/// `max_len` — or cuts hard when the last space sits at or before position
/// [`MIN_SOFT_CUT`]. Chunks that reduce to bare punctuation are discarded.
#[must_use]
pub fn chunk(text: &str, max_len: usize) -> Vec<String> {
    let clean = sanitize(text);
    if clean.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for sentence in split_sentences(&clean) {
        if char_len(&sentence) <= max_len {
            push_if_useful(&mut out, &sentence);
            continue;
        }

        // Soft split at comma boundaries, accumulating up to max_len.
        let mut buf = String::new();
        for piece in sentence.split(", ") {
            let candidate = if buf.is_empty() {
                piece.to_owned()
            } else {
                format!("{buf}, {piece}")
            };
            if char_len(&candidate) <= max_len {
                buf = candidate;
                continue;
            }
            if !buf.is_empty() {
                push_if_useful(&mut out, &buf);
            }
            // Hard-wrap a piece that alone exceeds the budget.
            let mut rest = piece;
            while char_len(rest) > max_len {
                let cut = last_space_at_or_before(rest, max_len);
                let idx = match cut {
                    Some(i) if i > MIN_SOFT_CUT => i,
                    _ => max_len,
                };
                let split = byte_index(rest, idx);
                push_if_useful(&mut out, &rest[..split]);
                rest = rest[split..].trim();
            }
            buf = rest.to_owned();
        }
        if !buf.is_empty() {
            push_if_useful(&mut out, &buf);
        }
    }
    out
}

fn push_if_useful(out: &mut Vec<String>, chunk: &str) {
    let t = chunk.trim();
    if t.is_empty() {
        return;
    }
    let mut chars = t.chars();
    if let (Some(only), None) = (chars.next(), chars.next()) {
        if matches!(only, ',' | '.' | ';' | ':' | '!' | '?' | '…' | '-') {
            return;
        }
    }
    out.push(t.to_owned());
}

/// Sentences with their terminal punctuation run attached. A trailing
/// fragment without terminal punctuation is kept as a final sentence.
fn split_sentences(clean: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = clean.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if !is_terminal(c) {
            continue;
        }
        while chars.peek().copied().is_some_and(is_terminal) {
            current.push(chars.next().expect("peeked"));
        }
        if chars.peek().is_some_and(|p| p.is_whitespace()) {
            while chars.peek().is_some_and(|p| p.is_whitespace()) {
                chars.next();
            }
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

/// Remove fenced code blocks, then inline code spans, each replaced by a
/// single space. Unterminated spans are left for the decoration pass to
/// pick apart.
fn strip_code_spans(text: &str) -> String {
    let without_fences = strip_delimited(text, "```");
    strip_delimited(&without_fences, "`")
}

fn strip_delimited(text: &str, delim: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(delim) {
        let Some(len) = rest[start + delim.len()..].find(delim) else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push(' ');
        rest = &rest[start + delim.len() + len + delim.len()..];
    }
    out.push_str(rest);
    out
}

/// Replace `[label](url)` links with their label for http(s) and mailto
/// targets. Anything not shaped exactly like a link passes through.
fn rewrite_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match parse_link(tail) {
            Some((label, after)) => {
                out.push_str(label);
                rest = after;
            }
            None => {
                out.push('[');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a markdown link at the start of `tail` (which begins with `[`).
/// Returns the label and the remainder after the closing parenthesis.
fn parse_link(tail: &str) -> Option<(&str, &str)> {
    let inner = &tail[1..];
    let close = inner.find(']')?;
    if close == 0 {
        return None;
    }
    let label = &inner[..close];
    let target = inner[close + 1..].strip_prefix('(')?;

    let scheme_len = ["https://", "http://", "mailto:"]
        .iter()
        .find(|s| {
            target
                .get(..s.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(s))
        })
        .map(|s| s.len())?;
    let end = target.find(')')?;
    if end <= scheme_len {
        return None;
    }
    Some((label, &target[end + 1..]))
}

/// Drop markdown decoration characters outright.
fn strip_decorations(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '~' | '`' | '#' | '>'))
        .collect()
}

/// Brackets become spaces so adjacent words stay separated.
fn space_out_brackets(text: &str) -> String {
    text.chars()
        .map(|c| {
            if matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '<') {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Runs of three or more hyphens read as a dash.
fn collapse_hyphen_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '-' {
            run += 1;
            continue;
        }
        flush_hyphens(&mut out, &mut run);
        out.push(c);
    }
    flush_hyphens(&mut out, &mut run);
    out
}

fn flush_hyphens(out: &mut String, run: &mut usize) {
    if *run >= 3 {
        out.push('—');
    } else {
        for _ in 0..*run {
            out.push('-');
        }
    }
    *run = 0;
}

/// Exactly one space after sentence punctuation, none before it.
fn space_sentence_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut pending_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_ws = true;
            continue;
        }
        if matches!(c, ',' | '.' | ';' | ':' | '!' | '?' | '…') {
            pending_ws = false;
            out.push(c);
            out.push(' ');
        } else {
            if pending_ws {
                out.push(' ');
                pending_ws = false;
            }
            out.push(c);
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `char_idx`-th char, or the string length past the end.
fn byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map_or(s.len(), |(i, _)| i)
}

/// Char index of the last space at or before `max_chars`, if any.
fn last_space_at_or_before(s: &str, max_chars: usize) -> Option<usize> {
    let mut last = None;
    for (ci, c) in s.chars().enumerate() {
        if ci > max_chars {
            break;
        }
        if c == ' ' {
            last = Some(ci);
        }
    }
    last
}
