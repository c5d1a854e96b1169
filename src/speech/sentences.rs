//! Splitting reply text into sentences for synthesis

/// Characters that end a sentence
const TERMINATORS: &[char] = &['.', '!', '?', '…'];

fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// Split `text` into sentences, each ending in its terminal punctuation
///
/// Runs of terminators (`...`, `?!`) stay attached to their sentence. A
/// period between two digits does not end a sentence. Fragments with no
/// words are dropped, and a final fragment with no terminator gets a period.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let decimal_point = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);

        if is_terminator(c) && !decimal_point {
            let mut punctuation = String::new();
            while i < chars.len() && is_terminator(chars[i]) {
                punctuation.push(chars[i]);
                i += 1;
            }
            push_sentence(&mut sentences, &current, &punctuation);
            current.clear();
            continue;
        }

        current.push(c);
        i += 1;
    }

    push_sentence(&mut sentences, &current, ".");
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, body: &str, punctuation: &str) {
    let body = body.trim();
    if body.chars().any(char::is_alphanumeric) {
        sentences.push(format!("{body}{punctuation}"));
    }
}
