//! Codec option lists and the command-line style parser for custom options.

/// Ordered codec options, applied to the codec in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    entries: Vec<(String, String)>,
}

impl CodecOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `-key=value` and `-key value` tokens.
    ///
    /// Values may be wrapped in single or double quotes, and a backslash
    /// escapes the next character. Tokens that are not options, and options
    /// without a value, are logged and skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut options = Self::new();
        let tokens = tokenize(text);
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            let Some(option) = token.strip_prefix('-').filter(|o| !o.is_empty()) else {
                tracing::warn!("ignoring custom option token '{}': expected -key=value", token);
                continue;
            };

            if let Some((key, value)) = option.split_once('=') {
                if key.is_empty() {
                    tracing::warn!("ignoring custom option '{}': empty key", token);
                } else {
                    options.set(key, value);
                }
                continue;
            }

            let takes_next = iter
                .peek()
                .is_some_and(|next| !next.starts_with('-') || next.parse::<f64>().is_ok());
            match iter.next_if(|_| takes_next) {
                Some(value) => options.set(option, value),
                None => tracing::warn!("ignoring custom option '{}': missing value", token),
            }
        }
        options
    }

    /// Set a value, replacing an earlier value of the same key in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Append every option of `other`, in order.
    pub fn extend(&mut self, other: CodecOptions) {
        for (key, value) in other.entries {
            self.set(key, value);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split on whitespace outside quotes, resolving quotes and escapes.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                in_token = true;
            }
            (c, Some(q)) if c == q => quote = None,
            (c, Some(_)) => current.push(c),
            ('"' | '\'', None) => {
                quote = Some(c);
                in_token = true;
            }
            (c, None) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (c, None) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        tracing::warn!("unterminated {} quote in custom options", q);
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(options: &CodecOptions) -> Vec<(&str, &str)> {
        options.iter().collect()
    }

    #[test]
    fn test_parse_equals_and_space_forms() {
        let options = CodecOptions::parse("-preset=slow -crf 23 -tune  zerolatency");
        assert_eq!(
            pairs(&options),
            vec![("preset", "slow"), ("crf", "23"), ("tune", "zerolatency")]
        );
    }

    #[test]
    fn test_parse_quotes_and_escapes() {
        let options = CodecOptions::parse(r#"-x264-params "keyint=60:bframes=0" -title='a b' -path=c:\\tmp\ dir"#);
        assert_eq!(options.get("x264-params"), Some("keyint=60:bframes=0"));
        assert_eq!(options.get("title"), Some("a b"));
        assert_eq!(options.get("path"), Some(r"c:\tmp dir"));
    }

    #[test]
    fn test_parse_negative_value() {
        let options = CodecOptions::parse("-qp -1 -g 30");
        assert_eq!(pairs(&options), vec![("qp", "-1"), ("g", "30")]);
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        let options = CodecOptions::parse("stray -=5 -bf -g=12 -lonely");
        assert_eq!(pairs(&options), vec![("g", "12")]);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut options = CodecOptions::new();
        options.set("b", "1000");
        options.set("g", "60");
        options.set("b", "2000");
        assert_eq!(pairs(&options), vec![("b", "2000"), ("g", "60")]);
        assert!(CodecOptions::parse("   ").is_empty());
    }
}
