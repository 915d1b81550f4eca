use std::sync::Arc;

use crate::extractor::tokenizer::Token;
use crate::whitelist::{is_valid_symbol, Stoplist, WhitelistIndex};

/// One stage of the candidate pipeline. Stages are pure and run in order;
/// a token survives only if every stage accepts it.
pub trait TokenFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn accept(&self, token: &Token) -> bool;
}

/// 1-5 uppercase ASCII letters.
pub struct SymbolPattern;

impl TokenFilter for SymbolPattern {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn accept(&self, token: &Token) -> bool {
        is_valid_symbol(&token.text)
    }
}

/// Symbol is listed and active.
pub struct ActiveWhitelist(pub Arc<WhitelistIndex>);

impl TokenFilter for ActiveWhitelist {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    fn accept(&self, token: &Token) -> bool {
        self.0.is_active(&token.text)
    }
}

/// Drops common words unless written as a cashtag.
pub struct Disambiguation(pub Arc<Stoplist>);

impl TokenFilter for Disambiguation {
    fn name(&self) -> &'static str {
        "stoplist"
    }

    fn accept(&self, token: &Token) -> bool {
        token.cashtag || !self.0.contains(&token.text)
    }
}

/// The standard stage order: shape, whitelist, then stoplist.
pub fn standard_stages(
    whitelist: Arc<WhitelistIndex>,
    stoplist: Arc<Stoplist>,
) -> Vec<Box<dyn TokenFilter>> {
    vec![
        Box::new(SymbolPattern),
        Box::new(ActiveWhitelist(whitelist)),
        Box::new(Disambiguation(stoplist)),
    ]
}

/// Name of the first stage rejecting `token`, or None if it passes all of them.
pub fn first_rejection(stages: &[Box<dyn TokenFilter>], token: &Token) -> Option<&'static str> {
    stages.iter().find(|s| !s.accept(token)).map(|s| s.name())
}
