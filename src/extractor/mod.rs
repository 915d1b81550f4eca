pub mod filters;
pub mod tokenizer;

use std::sync::Arc;

use tracing::trace;

use crate::config::CONTEXT_WINDOW_CHARS;
use crate::extractor::filters::{first_rejection, standard_stages, TokenFilter};
use crate::extractor::tokenizer::{context_window, tokenize, Token};
use crate::types::{MentionCandidate, SourceKind};
use crate::whitelist::{Stoplist, WhitelistIndex};

/// Turns content text into mention candidates.
///
/// Output is a pure function of (text, whitelist, stoplist): the same inputs
/// always yield the same candidates in the same order. Repeated symbols yield
/// one candidate per occurrence; deduplication happens at write time.
#[derive(Clone)]
pub struct TickerExtractor {
    whitelist: Arc<WhitelistIndex>,
    stages: Arc<[Box<dyn TokenFilter>]>,
    context_chars: usize,
}

impl TickerExtractor {
    pub fn new(whitelist: Arc<WhitelistIndex>, stoplist: Arc<Stoplist>) -> Self {
        let stages = standard_stages(Arc::clone(&whitelist), stoplist);
        Self {
            whitelist,
            stages: Arc::from(stages),
            context_chars: CONTEXT_WINDOW_CHARS,
        }
    }

    pub fn with_context_chars(mut self, n: usize) -> Self {
        self.context_chars = n;
        self
    }

    pub fn whitelist(&self) -> &WhitelistIndex {
        &self.whitelist
    }

    /// Scans `text`. Never fails: unusable input yields nothing.
    pub fn extract<'a>(
        &'a self,
        text: &str,
        source: SourceKind,
    ) -> impl Iterator<Item = MentionCandidate> + 'a {
        let chars: Vec<char> = text.chars().collect();
        let radius = self.context_chars;
        tokenize(text)
            .filter(move |token| self.passes(token))
            .map(move |token| MentionCandidate {
                context: context_window(&chars, token.start, token.end, radius),
                symbol: token.text,
                position: token.start,
                source,
                cashtag: token.cashtag,
            })
    }

    fn passes(&self, token: &Token) -> bool {
        match first_rejection(&self.stages, token) {
            None => true,
            Some(stage) => {
                trace!(token = %token.text, stage, "Token rejected");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(symbols: &[&str], stop: &[&str]) -> TickerExtractor {
        TickerExtractor::new(
            Arc::new(WhitelistIndex::from_symbols(symbols)),
            Arc::new(Stoplist::from_words(stop.iter().copied())),
        )
    }

    fn symbols(ex: &TickerExtractor, text: &str) -> Vec<String> {
        ex.extract(text, SourceKind::Post).map(|c| c.symbol).collect()
    }

    #[test]
    fn stoplisted_word_without_cashtag_is_suppressed() {
        let ex = extractor(&["GME", "ALL"], &["ALL"]);
        let found: Vec<_> = ex
            .extract("I'm bullish on $GME and also ALL my savings", SourceKind::Post)
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "GME");
        assert_eq!(found[0].position, 16);
        assert!(found[0].cashtag);
    }

    #[test]
    fn cashtag_rescues_stoplisted_symbol() {
        let ex = extractor(&["ALL"], &["ALL"]);
        assert_eq!(symbols(&ex, "Allstate is $ALL"), vec!["ALL"]);
    }

    #[test]
    fn plain_and_prefixed_symbols() {
        let ex = extractor(&["AAPL", "TSLA"], &[]);
        assert_eq!(symbols(&ex, "Buy $AAPL or go all-in on TSLA!"), vec!["AAPL", "TSLA"]);
    }

    #[test]
    fn repeats_and_adjacent_symbols_are_separate_candidates() {
        let ex = extractor(&["GME", "AMC"], &[]);
        let found: Vec<_> = ex.extract("GME/AMC GME", SourceKind::Comment).collect();
        let got: Vec<_> = found.iter().map(|c| (c.symbol.as_str(), c.position)).collect();
        assert_eq!(got, vec![("GME", 0), ("AMC", 4), ("GME", 8)]);
        assert!(found.iter().all(|c| c.source == SourceKind::Comment));
    }

    #[test]
    fn lowercase_and_long_words_never_match() {
        let ex = extractor(&["GME"], &[]);
        assert!(symbols(&ex, "gme Gme GMEX BANANAS").is_empty());
    }

    #[test]
    fn inactive_symbols_are_ignored() {
        let wl = WhitelistIndex::parse("symbol,active\nGME,0\n").unwrap();
        let ex = TickerExtractor::new(Arc::new(wl), Arc::new(Stoplist::from_words([])));
        assert!(symbols(&ex, "$GME GME").is_empty());
    }

    #[test]
    fn urls_do_not_produce_mentions() {
        let ex = extractor(&["TSLA"], &[]);
        assert!(symbols(&ex, "https://example.com/TSLA").is_empty());
    }

    #[test]
    fn context_window_surrounds_the_symbol() {
        let ex = extractor(&["GME"], &[]).with_context_chars(5);
        let c = ex.extract("long text before GME and after", SourceKind::Post).next().unwrap();
        assert_eq!(c.context, "fore GME and");
    }

    #[test]
    fn extraction_is_repeatable() {
        let ex = extractor(&["GME", "AMC", "ALL"], &["ALL"]);
        let text = "ALL in on $AMC, GME, $ALL &amp; more GME";
        let a: Vec<_> = ex.extract(text, SourceKind::Post).collect();
        let b: Vec<_> = ex.extract(text, SourceKind::Post).collect();
        assert_eq!(a, b);
        assert_eq!(
            a.iter().map(|c| c.symbol.as_str()).collect::<Vec<_>>(),
            vec!["AMC", "GME", "ALL", "GME"]
        );
    }

    #[test]
    fn stages_are_built_once_and_shared_by_clones() {
        let ex = extractor(&["GME"], &["ALL"]);
        let copy = ex.clone();
        assert!(Arc::ptr_eq(&ex.stages, &copy.stages));
        let names: Vec<_> = ex.stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["pattern", "whitelist", "stoplist"]);
    }

    #[test]
    fn markdown_link_target_is_not_a_mention() {
        let ex = extractor(&["NVDA", "AMD"], &[]);
        let found: Vec<_> = ex
            .extract("[NVDA](https://x.example/AMD) and AMD", SourceKind::Post)
            .map(|c| (c.symbol, c.position))
            .collect();
        assert_eq!(found, vec![("NVDA".to_string(), 1), ("AMD".to_string(), 34)]);
    }

    #[test]
    fn malformed_text_yields_nothing() {
        let ex = extractor(&["GME"], &[]);
        assert!(symbols(&ex, "\u{0}\u{FFFD}$$$&&&;;;").is_empty());
    }
}
