//! Token-and-count-aware batch planning.

/// `ceil(len/4)`: stays safely below provider token limits.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Plan batches over `texts` by index: each batch keeps the running token
/// estimate within `max_tokens` and the item count within `max_items`.
/// A single text above the token ceiling is submitted alone.
pub fn plan_batches(texts: &[String], max_tokens: usize, max_items: usize) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;

    for (idx, text) in texts.iter().enumerate() {
        let tokens = estimate_tokens(text);
        if tokens > max_tokens {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            batches.push(vec![idx]);
            continue;
        }
        if !current.is_empty()
            && (current_tokens + tokens > max_tokens || current.len() >= max_items)
        {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(idx);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sizes: &[usize]) -> Vec<String> {
        sizes.iter().map(|n| "x".repeat(*n)).collect()
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn splits_on_token_budget() {
        // 3 texts of ~25 tokens each, budget 50 → [2, 1].
        let t = texts(&[100, 100, 100]);
        let batches = plan_batches(&t, 50, 10);
        assert_eq!(batches, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn splits_on_item_count() {
        let t = texts(&[4, 4, 4, 4, 4]);
        let batches = plan_batches(&t, 1000, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![0, 1]);
    }

    #[test]
    fn oversized_text_goes_alone() {
        let t = texts(&[4, 400, 4]);
        let batches = plan_batches(&t, 50, 10);
        assert_eq!(batches, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn every_index_is_planned_exactly_once() {
        let t = texts(&[10, 300, 7, 7, 7, 900, 1]);
        let batches = plan_batches(&t, 60, 3);
        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..t.len()).collect::<Vec<_>>());
    }
}
