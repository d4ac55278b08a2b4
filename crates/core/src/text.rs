//! Spanish text utilities: normalization, yes/no detection, tolerant
//! amount parsing, name capture and outbound chunking

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

/// Lowercase and fold accented characters so keyword checks see one
/// canonical form ("Crédito" and "credito" match the same).
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

const AFFIRMATIVE_PHRASES: [&str; 30] = [
    "si", "sip", "sep", "simon", "ok", "okay", "va", "vale", "sale", "dale", "claro",
    "claro que si", "por supuesto", "correcto", "exacto", "asi es", "de acuerdo", "perfecto",
    "me parece", "esta bien", "va que va", "arre", "orale", "andale", "yes", "yeah", "aja",
    "afirmativo", "seguro", "obvio",
];

const AFFIRMATIVE_LEADS: [&str; 8] = ["si", "sip", "claro", "dale", "va", "sale", "arre", "ok"];

const NEGATIVE_PHRASES: [&str; 9] = [
    "no", "nel", "nop", "nope", "negativo", "para nada", "no gracias", "aun no", "todavia no",
];

fn strip_edge_punctuation(s: &str) -> String {
    s.trim_matches(|c: char| c.is_whitespace() || "!¡.?¿,;:".contains(c))
        .to_string()
}

/// Whole-message yes detection. Matches the lexicon exactly, or a
/// message whose first word is an affirmative lead ("sí, claro").
pub fn is_affirmative(s: &str) -> bool {
    let norm = strip_edge_punctuation(&normalize(s));
    if norm.is_empty() {
        return false;
    }
    if AFFIRMATIVE_PHRASES.contains(&norm.as_str()) {
        return true;
    }
    let first = norm
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("");
    AFFIRMATIVE_LEADS.contains(&first) && !norm.starts_with("si no")
}

/// Whole-message no detection, same shape as [`is_affirmative`].
pub fn is_negative(s: &str) -> bool {
    let norm = strip_edge_punctuation(&normalize(s));
    if norm.is_empty() {
        return false;
    }
    if NEGATIVE_PHRASES.contains(&norm.as_str()) {
        return true;
    }
    let first = norm
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("");
    first == "no" || first == "nel"
}

static MILLIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:millones|millon|mdp)").unwrap());
// "mil" with keyboard-mangled spellings seen in the wild: "m1l", "m i l".
static THOUSANDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:m\s*[i1]\s*l\b|k\b)").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Parse a money amount out of free text.
///
/// Accepts "$1,500,000", "67 mil", mangled "234m1l", "25k",
/// "1.5 millones". A bare number under 1000 is read as thousands of
/// pesos ("gano 25" means 25,000).
pub fn parse_amount(text: &str) -> Option<i64> {
    let norm = normalize(text)
        .replace(',', "")
        .replace('$', "")
        .replace("pesos", "");

    if let Some(caps) = MILLIONS_RE.captures(&norm) {
        let value: f64 = caps[1].parse().ok()?;
        return Some((value * 1_000_000.0).round() as i64);
    }
    if let Some(caps) = THOUSANDS_RE.captures(&norm) {
        let value: f64 = caps[1].parse().ok()?;
        return Some((value * 1_000.0).round() as i64);
    }
    let m = NUMBER_RE.find(&norm)?;
    let value: f64 = m.as_str().parse().ok()?;
    let amount = if value < 1_000.0 { value * 1_000.0 } else { value };
    Some(amount.round() as i64)
}

/// Format an amount in pesos with thousands separators: `$1,650,000`.
pub fn format_money(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

pub fn find_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_lowercase())
}

static EXPLICIT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:soy|me llamo|mi nombre es)\s+([\p{L}]{2,}(?:\s+[\p{L}]{2,})?)").unwrap()
});

const NAME_STOP_WORDS: [&str; 12] = [
    "si", "no", "ok", "hola", "gracias", "buenas", "buenos", "dias", "tardes", "noches", "que",
    "como",
];

/// A name found in a message, with whether the sender introduced
/// themselves explicitly ("me llamo ...") or just typed a bare name.
#[derive(Debug, Clone, PartialEq)]
pub struct NameCapture {
    pub name: String,
    pub explicit: bool,
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pull a person name out of a customer message.
///
/// Explicit introductions win; otherwise a message that is nothing but
/// one or two alphabetic words is read as a bare name reply, unless the
/// words are greetings or fillers.
pub fn extract_name(text: &str) -> Option<NameCapture> {
    if let Some(caps) = EXPLICIT_NAME_RE.captures(text) {
        return Some(NameCapture {
            name: title_case(caps[1].trim()),
            explicit: true,
        });
    }

    let trimmed = strip_edge_punctuation(text);
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.is_empty() || words.len() > 2 {
        return None;
    }
    for word in &words {
        if word.chars().count() < 2 || !word.chars().all(|c| c.is_alphabetic()) {
            return None;
        }
        if NAME_STOP_WORDS.contains(&normalize(word).as_str()) {
            return None;
        }
    }
    Some(NameCapture {
        name: title_case(&trimmed),
        explicit: false,
    })
}

static RATING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}").unwrap());

/// First 1 to 10 rating in the text, for survey answers.
pub fn parse_rating(text: &str) -> Option<u8> {
    for m in RATING_RE.find_iter(text) {
        if let Ok(n) = m.as_str().parse::<u8>() {
            if (1..=10).contains(&n) {
                return Some(n);
            }
        }
    }
    None
}

/// Split an outbound message into transport-sized chunks, preferring
/// paragraph breaks and never cutting through a grapheme cluster.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for paragraph in text.split("\n\n") {
        let para_len = paragraph.chars().count();
        if current_len > 0 && current_len + 2 + para_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if para_len > max_chars {
            // Hard split an oversized paragraph on grapheme boundaries.
            for grapheme in paragraph.graphemes(true) {
                let g_len = grapheme.chars().count();
                if current_len + g_len > max_chars {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push_str(grapheme);
                current_len += g_len;
            }
        } else {
            if current_len > 0 {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(paragraph);
            current_len += para_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
