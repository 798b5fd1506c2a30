use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::token::Token;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Standard Unicode word tokenizer.
pub struct StandardTokenizer {
    pub max_token_length: usize,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        StandardTokenizer {
            max_token_length: 255,
        }
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        for word in text.unicode_words() {
            if word.len() <= self.max_token_length {
                tokens.push(Token::new(word, position));
                position += 1;
            }
        }
        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }
}

/// Emits the whole value as a single token.
pub struct KeywordTokenizer;

impl Tokenizer for KeywordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![Token::new(text, 0)]
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Emits the full address plus its local part and domain.
pub struct EmailTokenizer;

impl Tokenizer for EmailTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let addr = text.trim();
        if addr.is_empty() {
            return Vec::new();
        }
        let mut tokens = vec![Token::new(addr, 0)];
        if let Some((local, domain)) = addr.split_once('@') {
            if !local.is_empty() {
                tokens.push(Token::new(local, 1));
            }
            if !domain.is_empty() {
                tokens.push(Token::new(domain, 2));
            }
        }
        tokens
    }

    fn name(&self) -> &str {
        "email"
    }
}

/// Strips the scheme, splits the host on `.` and the path on `/`,
/// dropping purely numeric path segments.
pub struct UrlTokenizer;

impl Tokenizer for UrlTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let stripped = text
            .trim()
            .strip_prefix("https://")
            .or_else(|| text.trim().strip_prefix("http://"))
            .unwrap_or_else(|| text.trim());
        // Query string and fragment carry no searchable structure.
        let stripped = stripped
            .split(['?', '#'])
            .next()
            .unwrap_or(stripped);

        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut segments = stripped.split('/');
        if let Some(host) = segments.next() {
            for part in host.split('.') {
                if !part.is_empty() {
                    tokens.push(Token::new(part, position));
                    position += 1;
                }
            }
        }
        for segment in segments {
            if segment.is_empty() || segment.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            tokens.push(Token::new(segment, position));
            position += 1;
        }
        tokens
    }

    fn name(&self) -> &str {
        "url"
    }
}

/// Emits each digit group plus the digits-only normalisation.
pub struct PhoneTokenizer;

impl Tokenizer for PhoneTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        for group in text.split(|c: char| !c.is_ascii_digit()) {
            if group.is_empty() {
                continue;
            }
            tokens.push(Token::new(group, position));
            position += 1;
        }
        let normalized: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        if !normalized.is_empty() {
            tokens.push(Token::new(normalized, position));
        }
        tokens
    }

    fn name(&self) -> &str {
        "phone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_positions() {
        let tokens = StandardTokenizer::default().tokenize("Hello, brave new world!");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello", "brave", "new", "world"]);
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn test_keyword_single_token() {
        let tokens = KeywordTokenizer.tokenize("New York");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "New York");
        assert!(KeywordTokenizer.tokenize("").is_empty());
    }

    #[test]
    fn test_email_parts() {
        let tokens = EmailTokenizer.tokenize("ada@example.com");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["ada@example.com", "ada", "example.com"]);
    }

    #[test]
    fn test_url_segments() {
        let tokens = UrlTokenizer.tokenize("https://docs.example.com/guide/42/intro?ref=x");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        // Purely numeric path segment and the query string are dropped.
        assert_eq!(texts, vec!["docs", "example", "com", "guide", "intro"]);
    }

    #[test]
    fn test_phone_groups_and_normalisation() {
        let tokens = PhoneTokenizer.tokenize("+44 (123) 456-789");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["44", "123", "456", "789", "44123456789"]);
    }
}
