//! Post-processing: deterministic cleanup and analysis of extracted text.
//!
//! ## Why post-process at all?
//!
//! OCR output is *textually correct but messy*: runaway whitespace from
//! layout gaps, stray control characters, digit/letter look-alike swaps
//! (`1O0` for `100`), stuttered characters from double detections, and
//! spaces drifting in front of punctuation. These are mechanical defects
//! with mechanical fixes, so they live here as cheap, deterministic
//! regex/string rules rather than being pushed onto every consumer.
//!
//! On top of the repairs, this module derives the per-page analysis
//! surfaced in [`ProcessedPage`]: entities (deduplicated per kind),
//! line-level structure tags, a language label, and size stats.
//!
//! Every function is pure (`&str → value`) and independently testable.
//! Rule order matters: cleaning runs before correction so the look-alike
//! pass sees whole tokens, and entity extraction runs on *corrected* text
//! so `1O0.50` has already become `100.50`.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::output::{
    round2, DocumentSummary, EntityKind, EntityMap, LineTag, ProcessedPage, TextStats,
};

/// Clean, correct, and analyse one page's combined text.
pub fn process_page(text: &str, page_number: usize) -> ProcessedPage {
    let cleaned_text = clean(text);
    let corrected_text = correct_common_errors(&cleaned_text);
    let entities = extract_entities(&corrected_text);
    let structure = detect_structure(&corrected_text);
    let language = detect_language(&corrected_text);
    let stats = text_stats(&corrected_text);
    ProcessedPage {
        page_number,
        cleaned_text,
        corrected_text,
        entities,
        structure,
        language,
        stats,
    }
}

// ── Rule 1: Whitespace and control cleanup ────────────────────────────────

static RE_INNER_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Normalise whitespace without losing line structure.
///
/// - strips control characters except line breaks
/// - collapses runs of spaces/tabs inside a line to one space
/// - trims each line
/// - collapses runs of blank lines to a single blank line
/// - drops leading/trailing blank lines
pub fn clean(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .collect();

    let lines: Vec<String> = stripped
        .lines()
        .map(|l| RE_INNER_WS.replace_all(l.trim(), " ").into_owned())
        .collect();

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut blank_run = 0usize;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        kept.push(line.as_str());
    }
    while kept.first().is_some_and(|l| l.is_empty()) {
        kept.remove(0);
    }
    while kept.last().is_some_and(|l| l.is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}

// ── Rule 2: Character-level OCR repairs ───────────────────────────────────

static RE_LOOKALIKE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9OlIS]{2,}\b").unwrap());
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.!?;:])").unwrap());

/// Repair the classic OCR confusions.
///
/// - look-alike letters inside digit-bearing tokens (`O→0`, `l→1`, `I→1`,
///   `S→5`); tokens without a digit (`Oslo`, `IS`) are left alone
/// - runs of four or more identical characters collapse to one
/// - whitespace in front of punctuation is removed
pub fn correct_common_errors(text: &str) -> String {
    let repaired = RE_LOOKALIKE_RUN.replace_all(text, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        if token.bytes().any(|b| b.is_ascii_digit()) {
            token
                .chars()
                .map(|c| match c {
                    'O' => '0',
                    'l' | 'I' => '1',
                    'S' => '5',
                    other => other,
                })
                .collect()
        } else {
            token.to_string()
        }
    });
    let collapsed = collapse_repeats(&repaired, 4);
    RE_SPACE_BEFORE_PUNCT
        .replace_all(&collapsed, "$1")
        .into_owned()
}

fn collapse_repeats(text: &str, limit: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1usize;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        let emit = if run >= limit { 1 } else { run };
        for _ in 0..emit {
            out.push(c);
        }
    }
    out
}

// ── Rule 3: Entity extraction ─────────────────────────────────────────────

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").unwrap());
static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[-.\s]?)?(?:\(\d{2,4}\)[-.\s]?|\d{2,4}[-.\s])?\d{3,4}[-.\s]\d{4}\b")
        .unwrap()
});
static RE_DATE_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[-/.]\d{1,2}[-/.]\d{1,2}\b").unwrap());
static RE_DATE_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[-/.]\d{1,2}[-/.]\d{4}\b").unwrap());
static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"]+"#).unwrap());

/// Pull emails, phone numbers, dates, and URLs out of corrected text.
///
/// Values are deduplicated per kind; kinds with no matches are omitted
/// entirely so the serialised map stays small.
pub fn extract_entities(text: &str) -> EntityMap {
    let mut map = EntityMap::new();

    insert_matches(&mut map, EntityKind::Email, RE_EMAIL.find_iter(text));
    insert_matches(&mut map, EntityKind::Phone, RE_PHONE.find_iter(text));
    insert_matches(
        &mut map,
        EntityKind::Date,
        RE_DATE_YMD.find_iter(text).chain(RE_DATE_DMY.find_iter(text)),
    );

    let urls: BTreeSet<String> = RE_URL
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches([',', '.', ';', ':', '!', '?', ')'])
                .to_string()
        })
        .filter(|u| !u.is_empty())
        .collect();
    if !urls.is_empty() {
        map.insert(EntityKind::Url, urls);
    }

    map
}

fn insert_matches<'a>(
    map: &mut EntityMap,
    kind: EntityKind,
    matches: impl Iterator<Item = regex::Match<'a>>,
) {
    let set: BTreeSet<String> = matches.map(|m| m.as_str().to_string()).collect();
    if !set.is_empty() {
        map.insert(kind, set);
    }
}

// ── Rule 4: Structure detection ───────────────────────────────────────────

static RE_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•·]\s+|\d{1,2}[.)]\s+)").unwrap());
static RE_NUMBERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)*\.?\s+\S").unwrap());

/// Classify each non-empty line as heading, list item, table row, or
/// paragraph. Checks run in specificity order; table beats list beats
/// heading, and paragraph is the default.
pub fn detect_structure(text: &str) -> Vec<LineTag> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(classify_line)
        .collect()
}

fn classify_line(line: &str) -> LineTag {
    if is_table_row(line) {
        LineTag::TableRow
    } else if RE_LIST_MARKER.is_match(line) {
        LineTag::ListItem
    } else if is_heading(line) {
        LineTag::Heading
    } else {
        LineTag::Paragraph
    }
}

fn is_table_row(line: &str) -> bool {
    line.contains('\t') || line.matches('|').count() >= 2
}

/// Short line, no sentence-final punctuation, and either mostly uppercase,
/// section-numbered, or colon-terminated.
fn is_heading(line: &str) -> bool {
    let len = line.chars().count();
    if len == 0 || len > 60 {
        return false;
    }
    if line.ends_with(['.', '!', '?', ';', ',']) {
        return false;
    }
    if RE_NUMBERED_HEADING.is_match(line) || line.ends_with(':') {
        return true;
    }
    let (upper, alpha) = line.chars().fold((0usize, 0usize), |(u, a), c| {
        if c.is_alphabetic() {
            (u + c.is_uppercase() as usize, a + 1)
        } else {
            (u, a)
        }
    });
    alpha > 0 && (upper as f32 / alpha as f32) > 0.6
}

// ── Rule 5: Language and stats ────────────────────────────────────────────

/// Lowercase language label for a page of text.
///
/// `"mixed"` when detection is unsure (typically pages mixing scripts),
/// `"unknown"` when there is nothing to classify.
pub fn detect_language(text: &str) -> String {
    if text.trim().is_empty() {
        return "unknown".to_string();
    }
    match whatlang::detect(text) {
        Some(info) if info.is_reliable() => info.lang().eng_name().to_lowercase(),
        Some(_) => "mixed".to_string(),
        None => "unknown".to_string(),
    }
}

fn text_stats(text: &str) -> TextStats {
    TextStats {
        characters: text.chars().count(),
        words: text.split_whitespace().count(),
        lines: text.lines().filter(|l| !l.trim().is_empty()).count(),
    }
}

// ── Document aggregation ──────────────────────────────────────────────────

/// Aggregate per-page analyses into a document summary.
pub fn summarize(pages: &[ProcessedPage]) -> DocumentSummary {
    let total_characters: usize = pages.iter().map(|p| p.stats.characters).sum();
    let total_words: usize = pages.iter().map(|p| p.stats.words).sum();
    let (average_characters_per_page, average_words_per_page) = if pages.is_empty() {
        (0.0, 0.0)
    } else {
        let n = pages.len() as f64;
        (
            round2(total_characters as f64 / n),
            round2(total_words as f64 / n),
        )
    };

    let mut language_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for page in pages {
        *language_distribution.entry(page.language.clone()).or_insert(0) += 1;
    }

    let mut entities = EntityMap::new();
    for page in pages {
        for (kind, values) in &page.entities {
            entities
                .entry(*kind)
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    DocumentSummary {
        total_characters,
        total_words,
        average_characters_per_page,
        average_words_per_page,
        language_distribution,
        entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── clean ──

    #[test]
    fn clean_collapses_inner_whitespace() {
        assert_eq!(clean("hello \t  world"), "hello world");
    }

    #[test]
    fn clean_trims_lines_and_collapses_blank_runs() {
        let input = "  first line  \n\n\n\n  second line  ";
        assert_eq!(clean(input), "first line\n\nsecond line");
    }

    #[test]
    fn clean_strips_control_chars_but_keeps_newlines() {
        let input = "ab\u{0000}c\u{0007}\nnext";
        assert_eq!(clean(input), "abc\nnext");
    }

    #[test]
    fn clean_drops_leading_and_trailing_blank_lines() {
        assert_eq!(clean("\n\n\nbody\n\n\n"), "body");
    }

    #[test]
    fn clean_of_whitespace_only_input_is_empty() {
        assert_eq!(clean("   \n \t \n  "), "");
    }

    // ── correct_common_errors ──

    #[test]
    fn lookalikes_fix_only_digit_bearing_tokens() {
        assert_eq!(
            correct_common_errors("Room 1O1 in Oslo IS fine"),
            "Room 101 in Oslo IS fine"
        );
    }

    #[test]
    fn lookalikes_fix_invoice_style_tokens() {
        assert_eq!(
            correct_common_errors("total S50 on l0 May"),
            "total 550 on 10 May"
        );
    }

    #[test]
    fn long_character_runs_collapse() {
        assert_eq!(correct_common_errors("soooo good"), "so good");
        assert_eq!(correct_common_errors("book"), "book");
    }

    #[test]
    fn space_before_punctuation_is_removed() {
        assert_eq!(correct_common_errors("done , right ?"), "done, right?");
    }

    // ── extract_entities ──

    #[test]
    fn duplicate_emails_count_once() {
        let text = "Contact a@b.com or c@d.com; again a@b.com.";
        let entities = extract_entities(text);
        let emails = &entities[&EntityKind::Email];
        assert_eq!(emails.len(), 2);
        assert!(emails.contains("a@b.com"));
        assert!(emails.contains("c@d.com"));
    }

    #[test]
    fn dates_match_in_both_orders() {
        let entities = extract_entities("Issued 2024-01-15, due 28/02/2024.");
        let dates = &entities[&EntityKind::Date];
        assert!(dates.contains("2024-01-15"));
        assert!(dates.contains("28/02/2024"));
    }

    #[test]
    fn phone_numbers_need_separators() {
        let entities = extract_entities("Call +1 555 123 4567 or 555-1234. Ref 12345678.");
        let phones = &entities[&EntityKind::Phone];
        assert!(phones.iter().any(|p| p.contains("555 123 4567")));
        assert!(phones.contains("555-1234"));
        assert!(!phones.iter().any(|p| p.contains("12345678")));
    }

    #[test]
    fn urls_lose_trailing_punctuation() {
        let entities = extract_entities("See https://example.com/a.");
        assert!(entities[&EntityKind::Url].contains("https://example.com/a"));
    }

    #[test]
    fn kinds_without_matches_are_omitted() {
        let entities = extract_entities("no entities in here");
        assert!(entities.is_empty());
    }

    // ── detect_structure ──

    #[test]
    fn structure_tags_cover_the_common_shapes() {
        let text = "EXECUTIVE SUMMARY\n\
                    2.1 Results and discussion\n\
                    Ingredients:\n\
                    - first item\n\
                    2) second item\n\
                    | name | qty |\n\
                    A perfectly ordinary sentence that keeps going for a while.";
        let tags = detect_structure(text);
        assert_eq!(
            tags,
            vec![
                LineTag::Heading,
                LineTag::Heading,
                LineTag::Heading,
                LineTag::ListItem,
                LineTag::ListItem,
                LineTag::TableRow,
                LineTag::Paragraph,
            ]
        );
    }

    #[test]
    fn blank_lines_do_not_produce_tags() {
        assert_eq!(detect_structure("one\n\n\ntwo").len(), 2);
    }

    #[test]
    fn long_shouting_lines_are_not_headings() {
        let line =
            "THIS LINE OF UPPERCASE TEXT RUNS FAR PAST THE LENGTH ANY REASONABLE HEADING WOULD HAVE";
        assert_eq!(detect_structure(line), vec![LineTag::Paragraph]);
    }

    // ── detect_language ──

    #[test]
    fn english_prose_is_labelled_english() {
        let text = "The quarterly report shows steady growth across all regions, \
                    with particularly strong performance in the northern districts \
                    during the final weeks of the period.";
        assert_eq!(detect_language(text), "english");
    }

    #[test]
    fn korean_prose_is_labelled_korean() {
        let text = "안녕하세요. 오늘은 날씨가 맑고 따뜻합니다. 공원에서 산책을 했습니다.";
        assert_eq!(detect_language(text), "korean");
    }

    #[test]
    fn empty_text_is_unknown() {
        assert_eq!(detect_language("   "), "unknown");
    }

    // ── process_page / summarize ──

    #[test]
    fn process_page_wires_the_rules_together() {
        let raw = "  INVOICE   1O0  \n\n\n\nPay  by  2024-01-15 , contact  a@b.com  ";
        let page = process_page(raw, 3);
        assert_eq!(page.page_number, 3);
        assert!(page.cleaned_text.starts_with("INVOICE 1O0"));
        assert!(page.corrected_text.contains("INVOICE 100"));
        assert!(page.corrected_text.contains("2024-01-15, contact"));
        assert!(page.entities[&EntityKind::Email].contains("a@b.com"));
        assert_eq!(page.stats.lines, 2);
        assert!(page.stats.words > 0);
    }

    #[test]
    fn summarize_averages_and_merges() {
        let a = process_page("one two three\nwrite to a@b.com", 1);
        let b = process_page("four five\nwrite to c@d.com and a@b.com", 2);
        let summary = summarize(&[a.clone(), b.clone()]);

        assert_eq!(summary.total_words, a.stats.words + b.stats.words);
        assert_eq!(
            summary.average_words_per_page,
            round2((a.stats.words + b.stats.words) as f64 / 2.0)
        );
        assert_eq!(summary.entities[&EntityKind::Email].len(), 2);
        assert_eq!(summary.language_distribution.values().sum::<usize>(), 2);
    }

    #[test]
    fn summarize_of_no_pages_is_all_zero() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_characters, 0);
        assert_eq!(summary.average_words_per_page, 0.0);
        assert!(summary.entities.is_empty());
    }
}
