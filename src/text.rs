//! Word segmentation shared by the hashing embedder and the lexical reranker.

/// Split text into lowercase word segments.
///
/// Segments are maximal runs of alphanumeric characters, additionally split
/// where the run switches between ASCII and non-ASCII characters, so
/// `"查询AAPL股票"` yields `["查询", "aapl", "股票"]`.
pub fn word_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_ascii = false;

    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            continue;
        }

        let ascii = c.is_ascii();
        if !current.is_empty() && ascii != current_ascii {
            segments.push(std::mem::take(&mut current));
        }
        current_ascii = ascii;
        current.extend(c.to_lowercase());
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_punctuation_and_case_folds() {
        assert_eq!(word_segments("Get_Stock-Price now!"), vec!["get", "stock", "price", "now"]);
    }

    #[test]
    fn test_splits_on_script_boundary() {
        assert_eq!(word_segments("查询AAPL股票"), vec!["查询", "aapl", "股票"]);
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert!(word_segments("").is_empty());
        assert!(word_segments("，。!? ").is_empty());
    }
}
