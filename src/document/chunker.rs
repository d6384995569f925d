/// Text chunk produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position of the chunk in the document
    pub id: usize,
    /// Sentences of the chunk joined by single spaces
    pub text: String,
}

impl Chunk {
    pub fn new(id: usize, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Sentence-respecting chunker with a character budget per chunk.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_len: usize,
}

impl Chunker {
    /// Create a new chunker; `max_len` is measured in characters.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split text into chunks of whole sentences.
    ///
    /// Sentences are packed greedily while the space-joined length stays within
    /// `max_len`. A sentence longer than the budget becomes a chunk on its own.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for sentence in split_sentences(text) {
            let sentence_len = sentence.chars().count();
            let joined_len = if current.is_empty() {
                sentence_len
            } else {
                current_len + 1 + sentence_len
            };

            if joined_len <= self.max_len || current.is_empty() {
                current.push(sentence);
                current_len = joined_len;
            } else {
                chunks.push(Chunk::new(chunks.len(), current.join(" ")));
                current = vec![sentence];
                current_len = sentence_len;
            }
        }

        if !current.is_empty() {
            chunks.push(Chunk::new(chunks.len(), current.join(" ")));
        }

        chunks
    }
}

/// Split text after `.`, `!` or `?` when followed by whitespace.
///
/// Sentences keep their terminal punctuation and are trimmed; empty ones are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => false,
        };
        if boundary {
            let end = idx + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }

    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}
