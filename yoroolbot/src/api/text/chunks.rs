/// Maximum message length allowed by Telegram Bot API
/// See: https://core.telegram.org/bots/api#sendmessage
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Length of a text as Telegram counts it (UTF-16 code units)
pub fn telegram_length(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Iterator over message chunks grouped by maximum length
///
/// Lines are kept whole where possible. A single line longer than the
/// limit is cut at character boundaries instead of being dropped.
pub struct ChunksIterator<'a> {
    lines: std::str::Lines<'a>,
    max_length: usize,
    current_chunk: String,
    overflow: Option<String>,
}

impl<'a> ChunksIterator<'a> {
    pub fn new(text: &'a str, max_length: usize) -> Self {
        Self {
            lines: text.lines(),
            max_length: max_length.max(1),
            current_chunk: String::new(),
            overflow: None,
        }
    }

    /// Cut the head of an overlong line that fits into one message
    fn split_line(&self, line: &str) -> (String, Option<String>) {
        let mut head = String::new();
        let mut used = 0;
        for (idx, c) in line.char_indices() {
            let width = c.len_utf16();
            if used + width > self.max_length {
                return (head, Some(line[idx..].to_string()));
            }
            head.push(c);
            used += width;
        }
        (head, None)
    }
}

impl Iterator for ChunksIterator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.overflow.take() {
                Some(rest) => rest,
                None => match self.lines.next() {
                    Some(line) => line.to_string(),
                    None => break,
                },
            };

            if telegram_length(&line) > self.max_length {
                let (head, rest) = self.split_line(&line);
                self.overflow = rest;
                if self.current_chunk.is_empty() {
                    return Some(head);
                }
                let chunk = std::mem::replace(&mut self.current_chunk, head);
                return Some(chunk);
            }

            // Check if adding this line would exceed max length
            let would_exceed = !self.current_chunk.is_empty()
                && telegram_length(&self.current_chunk) + 1 + telegram_length(&line)
                    > self.max_length;

            if would_exceed {
                // Return the current chunk and start a new one with this line
                let chunk = std::mem::replace(&mut self.current_chunk, line);
                return Some(chunk);
            }
            if !self.current_chunk.is_empty() {
                self.current_chunk.push('\n');
            }
            self.current_chunk.push_str(&line);
        }

        // Return the last chunk if it's not empty
        if self.current_chunk.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.current_chunk))
        }
    }
}

/// Split a text by "\n" into messages, each not larger than `max_length`
pub fn split_by_max_length(text: &str, max_length: usize) -> Vec<String> {
    ChunksIterator::new(text, max_length).collect()
}
